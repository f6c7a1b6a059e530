//! Tokio broadcast event bus for sync notifications.
//!
//! Each coordinator owns its own bus; there is no process-wide instance.

use crate::models::SyncEvent;
use tokio::sync::broadcast;

/// Broadcasts [`SyncEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers (best effort).
    pub fn publish(&self, event: SyncEvent) {
        metrics::counter!("event_bus_publish_total", "event" => event.event_type()).increment(1);
        if self.sender.send(event).is_err() {
            // No subscribers.
            metrics::counter!("event_bus_publish_dropped_total").increment(1);
        }
    }

    /// Subscribes to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
