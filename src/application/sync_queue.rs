//! Durable, deduplicated list of pending remote operations.
//!
//! Entries live in the local cache, so they survive restarts. A drain applies
//! them in insertion order and keeps the ones that failed for the next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{AppError, Result, SyncEvent, SyncOperation, SyncQueueEntry};
use crate::infrastructure::LocalCache;

use super::event_bus::EventBus;
use super::remote_store::RemoteStore;

/// Outcome of one drain request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
    /// Another drain was already running; nothing was done.
    pub skipped: bool,
    /// The remote rejected the credentials; the drain stopped early.
    pub unauthenticated: bool,
}

impl DrainReport {
    const fn skipped() -> Self {
        Self {
            applied: 0,
            failed: 0,
            skipped: true,
            unauthenticated: false,
        }
    }
}

/// Clears the in-progress flag when the drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncQueue {
    cache: Arc<LocalCache>,
    remote: Arc<RemoteStore>,
    events: EventBus,
    draining: AtomicBool,
}

impl SyncQueue {
    #[must_use]
    pub const fn new(cache: Arc<LocalCache>, remote: Arc<RemoteStore>, events: EventBus) -> Self {
        Self {
            cache,
            remote,
            events,
            draining: AtomicBool::new(false),
        }
    }

    /// Queue an operation unless the same one is already pending.
    pub fn enqueue(&self, operation: SyncOperation, target_id: &str) -> Result<bool> {
        let inserted = self.cache.enqueue_unique(operation, target_id)?;
        if inserted {
            tracing::debug!(op = operation.as_str(), target = target_id, "Queued sync operation");
        }
        Ok(inserted)
    }

    pub fn pending(&self) -> Result<usize> {
        self.cache.queue_len()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Apply every pending entry to the remote store.
    ///
    /// Only one drain runs at a time; an overlapping call returns a skipped
    /// report immediately. Remote failures leave the entry queued and are
    /// counted, not returned. Local cache failures abort the drain. An entry
    /// queued again while it was being applied stays for the next pass.
    pub async fn drain(&self) -> Result<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress");
            return Ok(DrainReport::skipped());
        }
        let _guard = DrainGuard(&self.draining);

        let entries = self.cache.queue_entries()?;
        if entries.is_empty() {
            return Ok(DrainReport::default());
        }

        self.events.emit(SyncEvent::SyncStarted {
            pending: entries.len(),
        });

        let mut report = DrainReport::default();
        let mut last_error = None;

        for (index, entry) in entries.iter().enumerate() {
            match self.apply(entry).await {
                Ok(()) => {
                    if !self.cache.complete_queue_entry(entry)? {
                        tracing::debug!(
                            op = entry.operation.as_str(),
                            target = %entry.target_id,
                            "Entry re-queued during drain; keeping it"
                        );
                    }
                    report.applied += 1;
                }
                Err(AppError::NotAuthenticated) => {
                    tracing::warn!("Drain stopped: not authenticated");
                    report.unauthenticated = true;
                    report.failed += entries.len() - index;
                    last_error = Some(AppError::NotAuthenticated.to_string());
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        op = entry.operation.as_str(),
                        target = %entry.target_id,
                        error = %e,
                        "Sync operation failed; will retry"
                    );
                    report.failed += 1;
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            applied = report.applied,
            failed = report.failed,
            "Sync queue drained"
        );

        self.events.emit(SyncEvent::SyncCompleted {
            applied: report.applied,
            failed: report.failed,
        });
        if let Some(message) = last_error {
            self.events.emit(SyncEvent::SyncError { message });
        }

        Ok(report)
    }

    async fn apply(&self, entry: &SyncQueueEntry) -> Result<()> {
        match entry.operation {
            SyncOperation::SaveConversation => {
                let Some(conv) = self.cache.get_conversation(&entry.target_id)? else {
                    // deleted locally since it was queued
                    tracing::debug!(target = %entry.target_id, "Dropping save for missing conversation");
                    return Ok(());
                };
                self.remote.save_conversation(&conv).await
            }
            SyncOperation::DeleteConversation => {
                self.remote.delete_conversation(&entry.target_id).await
            }
        }
    }
}
