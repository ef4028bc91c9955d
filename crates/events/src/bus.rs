//! Event bus abstraction for publishing pipeline events to the host.
//!
//! The session controller and composer never talk to a UI directly; they emit
//! JSON payloads on a topic and whatever hosts the pipeline decides what to do.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Trait for emitting events to subscribers.
///
/// Implementations must not block: emission happens on the connection task
/// and on the capture thread.
pub trait EventBus: Send + Sync {
    /// Emit an event with a JSON payload.
    ///
    /// # Arguments
    /// * `topic` - Event name/topic (e.g., "session:progress")
    /// * `payload` - JSON payload to emit
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// Serialize `payload` and emit it on `topic`.
///
/// Serialization failures are logged and the event is dropped.
pub fn emit_json<T: Serialize>(bus: &dyn EventBus, topic: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => bus.emit(topic, value),
        Err(e) => tracing::warn!(topic, error = %e, "Failed to serialize event payload"),
    }
}

/// In-memory event bus for testing.
///
/// Captures all emitted events for later inspection.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<EmittedEvent>>,
}

/// A captured event from InMemoryEventBus.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    /// Get events for a specific topic.
    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Most recent payload emitted on `topic`.
    pub fn last_for(&self, topic: &str) -> Option<serde_json::Value> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .rev()
            .find(|e| e.topic == topic)
            .map(|e| e.payload.clone())
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }

    /// Get the number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    /// Check if no events have been captured.
    pub fn is_empty(&self) -> bool {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .push(EmittedEvent {
                topic: topic.to_string(),
                payload,
            });
    }
}
