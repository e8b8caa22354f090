use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, CorrelationId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number of an event within its aggregate's stream.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event, with no gaps. The store assigns them at append time;
/// callers only ever supply a version as an optimistic-concurrency
/// expectation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for an aggregate with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version of the first event (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An event as submitted for appending, before the store has assigned it
/// a sequence number.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "OrderCreated", "PaymentConfirmed").
    pub event_type: String,

    /// The correlation ID of the command that produced this event.
    pub correlation_id: CorrelationId,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewEvent {
    /// Creates a new event builder.
    pub fn builder() -> NewEventBuilder {
        NewEventBuilder::default()
    }
}

/// Builder for events submitted to the store.
#[derive(Debug, Default)]
pub struct NewEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    correlation_id: Option<CorrelationId>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl NewEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the correlation ID of the originating command.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if `event_type` or `payload` is not set.
    pub fn build(self) -> NewEvent {
        NewEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            correlation_id: self.correlation_id.unwrap_or_default(),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }
}

/// A committed event along with the metadata the store assigned to it.
///
/// Envelopes are immutable facts: once an envelope exists for an
/// aggregate at a given version, it never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event.
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Order", "OrderWorkflow").
    pub aggregate_type: String,

    /// Store-assigned sequence number within the aggregate's stream.
    pub version: Version,

    /// The correlation ID of the command that produced this event.
    pub correlation_id: CorrelationId,

    /// When the event was committed.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Seals a submitted event into a committed envelope.
    pub(crate) fn seal(
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        version: Version,
    ) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            version,
            correlation_id: event.correlation_id,
            timestamp: Utc::now(),
            payload: event.payload,
            metadata: event.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn new_event_builder() {
        let correlation_id = CorrelationId::new();
        let payload = serde_json::json!({"item": "test"});

        let event = NewEvent::builder()
            .event_type("TestEvent")
            .correlation_id(correlation_id)
            .payload_raw(payload.clone())
            .metadata("source", serde_json::json!("unit-test"))
            .build();

        assert_eq!(event.event_type, "TestEvent");
        assert_eq!(event.correlation_id, correlation_id);
        assert_eq!(event.payload, payload);
        assert_eq!(
            event.metadata.get("source"),
            Some(&serde_json::json!("unit-test"))
        );
    }

    #[test]
    fn seal_assigns_stream_position() {
        let aggregate_id = AggregateId::new();
        let event = NewEvent::builder()
            .event_type("TestEvent")
            .payload_raw(serde_json::json!({}))
            .build();

        let envelope = EventEnvelope::seal(event, aggregate_id, "Order", Version::first());

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.aggregate_type, "Order");
        assert_eq!(envelope.version, Version::first());
    }
}
