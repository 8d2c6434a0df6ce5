//! In-process publish/subscribe fan-out for engine events.

use crate::EngineEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast-backed event bus.
///
/// Subscribing returns an independent receiver; dropping it is the
/// unsubscribe, which makes unsubscribe idempotent by construction. Publishing
/// with no live subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` unread events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to every live subscriber.
    pub fn publish(&self, event: EngineEvent) {
        trace!(?event, "publishing engine event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
