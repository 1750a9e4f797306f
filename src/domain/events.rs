//! Notifications published to UI collaborators.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::sync::SyncMode;

/// Lifecycle event emitted by the sync engine.
///
/// Serialized with a `type` tag, e.g. `{"type":"full-sync-started"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// A token was acquired interactively.
    AuthSuccess,
    SyncModeChanged { from: SyncMode, to: SyncMode },
    /// A queue drain started with this many entries.
    SyncStarted { pending: usize },
    SyncCompleted { applied: usize, failed: usize },
    FullSyncStarted,
    FullSyncCompleted {
        conversations: usize,
        finished_at: DateTime<Utc>,
    },
    SyncError { message: String },
}

impl SyncEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth-success",
            Self::SyncModeChanged { .. } => "sync-mode-changed",
            Self::SyncStarted { .. } => "sync-started",
            Self::SyncCompleted { .. } => "sync-completed",
            Self::FullSyncStarted => "full-sync-started",
            Self::FullSyncCompleted { .. } => "full-sync-completed",
            Self::SyncError { .. } => "sync-error",
        }
    }
}
