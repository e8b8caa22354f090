//! Append notification channel.
//!
//! Every successful append publishes the committed envelopes so that
//! projections, the audit tap, and the saga orchestrator observe changes
//! without polling. Publication happens after commit and never
//! participates in the transactional path: a slow or absent subscriber
//! cannot fail an append.

use tokio::sync::broadcast;

use crate::EventEnvelope;

/// Default capacity of the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast fan-out for committed events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publishes committed envelopes to all current subscribers.
    ///
    /// A send error only means there are no subscribers right now, which
    /// is not a failure of the append.
    pub fn publish(&self, envelopes: &[EventEnvelope]) {
        for envelope in envelopes {
            let _ = self.sender.send(envelope.clone());
        }
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
