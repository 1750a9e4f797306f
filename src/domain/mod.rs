//! Domain layer - core types, state machines and policies.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod auth;
pub mod error;
pub mod events;
pub mod models;
pub mod sync;

pub use auth::{
    refresh_decision, ActivitySignal, AuthEvent, AuthPhase, RefreshDecision, TokenState,
};
pub use error::{AppError, Result};
pub use events::SyncEvent;
pub use models::{
    ArtifactPayload, ArtifactRecord, ArtifactReference, ContentPart, Conversation, Message,
    MessageContent, ReferenceKind, Role,
};
pub use sync::{
    merge, merge_sets, AppConfig, AuthConfig, ModeEvent, PathConfig, RemoteConfig, SyncConfig,
    SyncMode, SyncOperation, SyncQueueEntry, SyncStatus,
};
