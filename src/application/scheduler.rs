//! Cancellable periodic background tasks.
//!
//! A [`PeriodicTask`] runs a job on a fixed period until stopped. Stopping
//! waits for the loop to exit, so no job runs after `stop` returns.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Handle to a running periodic job.
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`. The first run happens one period after
    /// spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            tracing::debug!(task = name, period_ms = period.as_millis(), "Periodic task started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => job().await,
                }
            }

            tracing::debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    /// Task name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop to exit and wait for it. A job that is mid-run
    /// completes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(task = self.name, error = ?e, "Periodic task panicked");
        }
    }
}
