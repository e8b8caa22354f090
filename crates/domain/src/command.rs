//! Command handling infrastructure.

use std::marker::PhantomData;

use common::{AggregateId, CorrelationId};
use event_store::{AppendOptions, EventStore, EventStoreError, NewEvent, Version};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// How many times a command is re-executed against freshly loaded state
/// after losing an optimistic-concurrency race.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// A command targeting a specific aggregate instance.
pub trait Command {
    /// The aggregate type this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate by replaying its event stream
/// 2. Executing the command to produce events
/// 3. Persisting the events with optimistic concurrency
/// 4. Retrying against fresh state when another writer won the race
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate by replaying its event stream.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError>
    where
        A::Event: for<'de> serde::Deserialize<'de>,
    {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError>
    where
        A::Event: for<'de> serde::Deserialize<'de>,
    {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error. Business rule
    /// violations are surfaced immediately; concurrency conflicts cause the
    /// command to be re-executed against freshly loaded state, up to a
    /// bounded number of attempts.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        correlation_id: CorrelationId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A::Event: for<'de> serde::Deserialize<'de> + Serialize,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 0;
        loop {
            let mut aggregate = self.load(aggregate_id).await?;
            let current_version = aggregate.version();

            // Execute command to get events
            let events = command_fn(&aggregate)?;

            if events.is_empty() {
                return Ok(CommandResult {
                    aggregate,
                    events: vec![],
                    new_version: current_version,
                });
            }

            let new_events = build_events(correlation_id, &events)?;

            let options = if current_version == Version::initial() {
                AppendOptions::expect_new()
            } else {
                AppendOptions::expect_version(current_version)
            };

            match self
                .store
                .append(aggregate_id, A::aggregate_type(), new_events, options)
                .await
            {
                Ok(new_version) => {
                    for event in &events {
                        aggregate.apply(event.clone());
                    }
                    aggregate.set_version(new_version);

                    return Ok(CommandResult {
                        aggregate,
                        events,
                        new_version,
                    });
                }
                Err(EventStoreError::ConcurrencyConflict { .. })
                    if attempt < MAX_CONFLICT_RETRIES =>
                {
                    attempt += 1;
                    tracing::debug!(
                        %aggregate_id,
                        attempt,
                        "append lost concurrency race, re-reading state"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Builds store events from domain events, stamping the correlation ID.
fn build_events<E: DomainEvent>(
    correlation_id: CorrelationId,
    events: &[E],
) -> Result<Vec<NewEvent>, DomainError> {
    let mut new_events = Vec::with_capacity(events.len());
    for event in events {
        let new_event = NewEvent::builder()
            .event_type(event.event_type())
            .correlation_id(correlation_id)
            .payload(event)?
            .build();
        new_events.push(new_event);
    }
    Ok(new_events)
}
