// Broadcast fan-out for debug events.
// Observers that fall behind lose the oldest events rather than stalling the
// simulation thread that publishes them.

use tokio::sync::broadcast;

use crate::DebugEvent;

/// Default capacity of the broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Debug event bus that fans events out to any number of async subscribers
#[derive(Debug, Clone)]
pub struct DebugEventBus {
    sender: broadcast::Sender<DebugEvent>,
}

impl DebugEventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events from this bus
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: DebugEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(target: "debugger", kind = event.kind(), "No subscribers for debug event");
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DebugEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
