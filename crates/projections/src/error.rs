//! Projection error types.

use thiserror::Error;

/// Errors surfaced while feeding events into read models.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event store failed while streaming or subscribing.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An event payload did not deserialize into its domain event.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
