use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::{
    AggregateId, EventBus, EventEnvelope, EventQuery, NewEvent, Result, Version,
    store::{AppendOptions, EventStore, EventStream, check_expected_version, validate_events_for_append},
};

/// In-memory event store implementation.
///
/// Keeps the whole log in a single insertion-ordered vector, mirroring the
/// behavior of the PostgreSQL implementation. Used for tests and for the
/// in-process deployment mode.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    bus: EventBus,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Version> {
        validate_events_for_append(&events)?;

        let mut store = self.events.write().await;

        // Current version for this aggregate; sequence numbers continue
        // from here so the stream stays gapless.
        let current_version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        check_expected_version(aggregate_id, current_version, &options)?;

        let mut version = current_version;
        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            version = version.next();
            committed.push(EventEnvelope::seal(
                event,
                aggregate_id,
                aggregate_type,
                version,
            ));
        }

        store.extend(committed.iter().cloned());
        drop(store);

        self.bus.publish(&committed);

        Ok(version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let events: Vec<_> = store
            .iter()
            .filter(|e| {
                if let Some(id) = query.aggregate_id
                    && e.aggregate_id != id
                {
                    return false;
                }
                if let Some(ref agg_type) = query.aggregate_type
                    && &e.aggregate_type != agg_type
                {
                    return false;
                }
                if let Some(ref types) = query.event_types
                    && !types.contains(&e.event_type)
                {
                    return false;
                }
                if let Some(correlation_id) = query.correlation_id
                    && e.correlation_id != correlation_id
                {
                    return false;
                }
                if let Some(from) = query.from_version
                    && e.version < from
                {
                    return false;
                }
                if let Some(to) = query.to_version
                    && e.version > to
                {
                    return false;
                }
                if let Some(from) = query.from_timestamp
                    && e.timestamp < from
                {
                    return false;
                }
                if let Some(to) = query.to_timestamp
                    && e.timestamp > to
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Insertion order is already commit order; apply offset and limit.
        let offset = query.offset.unwrap_or(0);
        let events: Vec<_> = events.into_iter().skip(offset).collect();

        let events = if let Some(limit) = query.limit {
            events.into_iter().take(limit).collect()
        } else {
            events
        };

        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let store = self.events.read().await;
        let events = store.clone();

        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }
}
