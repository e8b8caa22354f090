//! Durable, append-only, per-aggregate ordered event log.
//!
//! The event store is the single source of truth for order and workflow
//! state. Events for one aggregate are never mutated or deleted; sequence
//! numbers are assigned by the store at append time and are gapless and
//! strictly increasing within an aggregate.
//!
//! Appends are guarded by optimistic concurrency: the caller supplies the
//! version it last observed, and the store rejects the append with a
//! [`EventStoreError::ConcurrencyConflict`] if another writer got there
//! first. Committed events are also published on a broadcast channel so
//! projections and the saga orchestrator observe changes without polling.

pub mod error;
pub mod event;
pub mod memory;
pub mod notify;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{AggregateId, CorrelationId};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, NewEvent, NewEventBuilder, Version};
pub use memory::InMemoryEventStore;
pub use notify::EventBus;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
