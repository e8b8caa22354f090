//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is used for serialization and event store filtering.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// Aggregates are never stored directly; their state is derived by folding
/// an ordered event stream. `apply` must be pure and deterministic so that
/// replaying events 1..N always reconstructs the same state the live
/// aggregate had after processing the same events incrementally.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    ///
    /// Used for event store organization and routing.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the current version (last applied sequence number).
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the command handler after persisting events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it always produces the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Folds an event stream into an aggregate from scratch.
    ///
    /// This is the replay contract: `fold(events[1..N])` equals the live
    /// aggregate's state after applying the same events one at a time.
    fn fold(events: impl IntoIterator<Item = Self::Event>) -> Self {
        let mut aggregate = Self::default();
        aggregate.apply_events(events);
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Created { id: AggregateId },
        Updated { value: i32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "TestCreated",
                TestEvent::Updated { .. } => "TestUpdated",
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct TestAggregate {
        id: Option<AggregateId>,
        value: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("test error")]
    struct TestError;

    impl Aggregate for TestAggregate {
        type Event = TestEvent;
        type Error = TestError;

        fn aggregate_type() -> &'static str {
            "TestAggregate"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TestEvent::Created { id } => {
                    self.id = Some(id);
                }
                TestEvent::Updated { value } => {
                    self.value = value;
                }
            }
        }
    }

    #[test]
    fn apply_events_in_sequence() {
        let id = AggregateId::new();
        let mut aggregate = TestAggregate::default();
        aggregate.apply_events(vec![
            TestEvent::Created { id },
            TestEvent::Updated { value: 42 },
        ]);

        assert_eq!(aggregate.id(), Some(id));
        assert_eq!(aggregate.value, 42);
    }

    #[test]
    fn fold_equals_incremental_apply() {
        let id = AggregateId::new();
        let events = vec![
            TestEvent::Created { id },
            TestEvent::Updated { value: 7 },
            TestEvent::Updated { value: 42 },
        ];

        let folded = TestAggregate::fold(events.clone());

        let mut incremental = TestAggregate::default();
        for event in events {
            incremental.apply(event);
        }

        assert_eq!(folded.id, incremental.id);
        assert_eq!(folded.value, incremental.value);
    }

    #[test]
    fn fold_is_deterministic() {
        let id = AggregateId::new();
        let events = vec![
            TestEvent::Created { id },
            TestEvent::Updated { value: 3 },
        ];

        let first = TestAggregate::fold(events.clone());
        let second = TestAggregate::fold(events);
        assert_eq!(first.value, second.value);
        assert_eq!(first.id, second.id);
    }
}
