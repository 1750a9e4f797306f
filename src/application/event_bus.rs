//! Broadcast bus for [`SyncEvent`]s.
//!
//! Every receiver alive at emit time gets its own copy of the event.
//! Dropping a receiver unsubscribes it.

use tokio::sync::broadcast;

use crate::domain::SyncEvent;

/// Default buffer capacity.
pub const EVENT_BUS_CAPACITY: usize = 64;

/// Typed publish/subscribe hub.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers. Without subscribers the
    /// event is dropped.
    pub fn emit(&self, event: SyncEvent) {
        tracing::debug!(
            event = event.name(),
            subscriber_count = self.tx.receiver_count(),
            "Emitting sync event"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(SyncEvent::FullSyncStarted);

        assert_eq!(a.recv().await.unwrap(), SyncEvent::FullSyncStarted);
        assert_eq!(b.recv().await.unwrap(), SyncEvent::FullSyncStarted);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(a);
        assert_eq!(bus.subscriber_count(), 0);

        // no subscribers: silently dropped
        bus.emit(SyncEvent::AuthSuccess);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::default();
        bus.emit(SyncEvent::AuthSuccess);
        let mut late = bus.subscribe();
        bus.emit(SyncEvent::FullSyncStarted);
        assert_eq!(late.recv().await.unwrap(), SyncEvent::FullSyncStarted);
    }
}
