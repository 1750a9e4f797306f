//! Offline-first conversation storage with Google Drive sync.
//!
//! Conversations and attachments are written to a local `SQLite` cache first
//! and pushed to the user's Drive in the background. See
//! [`application::SyncOrchestrator`] for the entry point.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

pub use application::{SyncOrchestrator, UploadOutcome};
pub use domain::{AppError, Result};
