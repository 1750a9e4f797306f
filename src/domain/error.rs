//! Domain-level error types for chat-sync.
//!
//! All errors are typed with `thiserror`. Remote failures are recoverable
//! (the sync queue or the next full sync retries them); local store failures
//! are fatal to the calling operation.

use std::path::PathBuf;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// No usable access token. Callers treat this as "go offline".
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Remote call failed at the transport level.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Remote service answered with a non-success status.
    #[error("Remote service returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    /// Referenced record does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A stored or downloaded record could not be parsed.
    #[error("Corrupt record {id}: {message}")]
    CorruptRecord { id: String, message: String },

    /// Local cache file could not be located or created.
    #[error("Local cache not available at: {path}")]
    CacheUnavailable { path: PathBuf },

    /// Failed to open or query the local database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid data supplied by a caller.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// A state machine received an event it cannot accept in its current state.
    #[error("Invalid transition: {event} while {state}")]
    InvalidTransition { state: String, event: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Create a network error from a reqwest error.
    pub fn network(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether the failure came from the remote side and may be retried later.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::Network { .. }
                | Self::RemoteStatus { .. }
                | Self::NotFound { .. }
                | Self::CorruptRecord { .. }
        )
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
