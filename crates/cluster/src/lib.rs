//! Cluster coordination for the order saga system.
//!
//! This crate provides the pieces that make multiple orchestrator nodes
//! safe to run side by side:
//! - `IdempotencyTracker` for cluster-wide request deduplication
//! - `LeaseCoordinator` for lease-based partition ownership
//! - `PartitionRouter` for mapping aggregates to partitions

pub mod error;
pub mod idempotency;
pub mod leader;
pub mod postgres;

pub use error::{ClusterError, Result};
pub use idempotency::{
    Admission, DEFAULT_IDEMPOTENCY_TTL, IdempotencyRecord, IdempotencyTracker,
    InMemoryIdempotencyTracker,
};
pub use leader::{
    ClusterNode, InMemoryLeaseCoordinator, LeaseCoordinator, LeaseResult, PartitionRouter,
    RenewalResult,
};
pub use postgres::PostgresIdempotencyTracker;
