use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::broadcast;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, NewEvent, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the aggregate for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the aggregate to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the aggregate to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
///
/// An event store persists and retrieves immutable events. All
/// implementations must be thread-safe (Send + Sync). Sequence numbers are
/// assigned by the store inside `append`, never by the caller.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to an aggregate's stream.
    ///
    /// Events are appended atomically and numbered sequentially starting
    /// from the aggregate's current version. If `options.expected_version`
    /// is set and does not match the current version, the append fails with
    /// [`EventStoreError::ConcurrencyConflict`] and nothing is written.
    ///
    /// Returns the version of the last appended event.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Version>;

    /// Retrieves all events for a specific aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events for an aggregate starting from a sequence number.
    ///
    /// This is the restartable read: a consumer that remembers the last
    /// version it saw can resume from there.
    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events matching a query.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams all events in the store, in insertion order.
    ///
    /// Used for replay and projection catch-up across all aggregates.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of an aggregate.
    ///
    /// Returns None if the aggregate doesn't exist.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Subscribes to events committed after this call.
    ///
    /// Every successful `append` publishes the committed envelopes on this
    /// channel. Subscribers that fall behind observe a lag error and should
    /// fall back to `stream_all_events` to catch up.
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        event: NewEvent,
        options: AppendOptions,
    ) -> Result<Version> {
        self.append(aggregate_id, aggregate_type, vec![event], options)
            .await
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch of events before appending.
pub(crate) fn validate_events_for_append(events: &[NewEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    }
    Ok(())
}

/// Checks the expected version against the observed current version.
pub(crate) fn check_expected_version(
    aggregate_id: AggregateId,
    current: Version,
    options: &AppendOptions,
) -> Result<()> {
    if let Some(expected) = options.expected_version
        && current != expected
    {
        return Err(EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual: current,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_options_defaults_to_no_check() {
        assert!(AppendOptions::new().expected_version.is_none());
    }

    #[test]
    fn append_options_expect_new_is_version_zero() {
        assert_eq!(
            AppendOptions::expect_new().expected_version,
            Some(Version::initial())
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn version_mismatch_is_a_conflict() {
        let id = AggregateId::new();
        let result = check_expected_version(
            id,
            Version::new(3),
            &AppendOptions::expect_version(Version::new(2)),
        );
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::new(2) && actual == Version::new(3)
        ));
    }

    #[test]
    fn matching_version_passes() {
        let id = AggregateId::new();
        let result = check_expected_version(
            id,
            Version::new(2),
            &AppendOptions::expect_version(Version::new(2)),
        );
        assert!(result.is_ok());
    }
}
