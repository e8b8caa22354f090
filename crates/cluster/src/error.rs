//! Error types for cluster coordination.

use thiserror::Error;

/// Errors that can occur during cluster coordination.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lease operation was attempted with a token that is no longer valid.
    #[error("Invalid lease token for partition {partition_key}")]
    InvalidLeaseToken {
        /// The partition the operation targeted.
        partition_key: String,
    },
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
