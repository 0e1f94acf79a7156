//! Typed change-notification bus.
//!
//! A closed set of event variants over a tokio broadcast channel.
//! Consumers (the fan-out hub, tests, embedding applications) subscribe
//! explicitly at startup; publishing never blocks, and a subscriber that
//! falls behind drops events rather than stalling the publisher.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::telemetry;

/// A change observed by the manager's refresh pipeline.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// The active key set was replaced.
    KeysChanged { keys: Vec<String> },
    /// A key's datafile advanced to a new revision.
    DocumentChanged { key: String, document: Value },
}

impl ChangeEvent {
    /// Discriminator string, used as a metrics label.
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::KeysChanged { .. } => "keys_changed",
            ChangeEvent::DocumentChanged { .. } => "document_changed",
        }
    }
}

/// Cloneable handle to the change-event broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Non-blocking; with no subscribers connected the event is dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let event_type = event.event_type();
        metrics::counter!(telemetry::EVENTS_TOTAL, "event" => event_type).increment(1);
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = event_type, receivers, "published change event"),
            Err(_) => debug!(event = event_type, "no subscribers for change event"),
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
