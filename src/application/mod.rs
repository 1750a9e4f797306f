//! Application layer - services and orchestration.
//!
//! This layer composes the token lifecycle, the remote store and the sync
//! queue into the storage API used by clients.

pub mod auth_manager;
pub mod event_bus;
pub mod formatter;
pub mod remote_store;
pub mod scheduler;
pub mod storage_manager;
pub mod sync_queue;

pub use auth_manager::AuthTokenManager;
pub use event_bus::EventBus;
pub use formatter::{
    format_conversation_markdown, format_conversations_json, format_conversations_table,
    format_event, format_sync_status, OutputFormat,
};
pub use remote_store::RemoteStore;
pub use scheduler::PeriodicTask;
pub use storage_manager::{SyncOrchestrator, UploadOutcome};
pub use sync_queue::{DrainReport, SyncQueue};
