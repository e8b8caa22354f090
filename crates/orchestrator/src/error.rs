//! Orchestrator error types.

use common::{AggregateId, CorrelationId};
use thiserror::Error;

use crate::step::WorkflowStep;

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// This node does not own the partition for the order.
    #[error("not leader for order {order_id} (current leader: {})", current_leader.as_deref().unwrap_or("unknown"))]
    NotLeader {
        order_id: AggregateId,
        current_leader: Option<String>,
    },

    /// No workflow exists with the given ID.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(AggregateId),

    /// No order exists with the given ID.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The order is not in a state the saga can start from.
    #[error("Order not ready for fulfillment: {0}")]
    OrderNotReady(String),

    /// A workflow already exists for this order.
    #[error("Workflow already started for order {0}")]
    AlreadyStarted(AggregateId),

    /// A step outcome arrived for a step the workflow is not waiting on.
    ///
    /// Responses that race ahead of the pipeline are rejected, never
    /// buffered: the executor retries and the outcome is accepted once
    /// the workflow reaches that step.
    #[error("out-of-order outcome for workflow {workflow_id}: awaiting {awaiting:?}, received {received}")]
    OutOfOrderOutcome {
        workflow_id: AggregateId,
        awaiting: Option<WorkflowStep>,
        received: WorkflowStep,
    },

    /// A step outcome carried a correlation ID that does not match the
    /// pending dispatch. Duplicate and superseded deliveries land here.
    #[error("stale outcome for workflow {workflow_id}, step {step}: correlation {correlation_id} is not pending")]
    StaleOutcome {
        workflow_id: AggregateId,
        step: WorkflowStep,
        correlation_id: CorrelationId,
    },

    /// A success outcome arrived without the reference its step must
    /// produce, such as a payment confirmation with no payment ID.
    #[error("malformed outcome for workflow {workflow_id}, step {step}: missing {missing}")]
    MalformedOutcome {
        workflow_id: AggregateId,
        step: WorkflowStep,
        missing: &'static str,
    },

    /// The command's correlation ID was admitted by another caller whose
    /// processing has not finished yet.
    #[error("command with correlation {0} is still in flight")]
    CommandInFlight(CorrelationId),

    /// The workflow is not in the state the operation requires.
    #[error("Invalid workflow state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: String },

    /// Payment executor failure.
    #[error("Payment executor error: {0}")]
    PaymentExecutor(String),

    /// Inventory executor failure.
    #[error("Inventory executor error: {0}")]
    InventoryExecutor(String),

    /// Fulfillment executor failure.
    #[error("Fulfillment executor error: {0}")]
    FulfillmentExecutor(String),

    /// Notification executor failure.
    #[error("Notification executor error: {0}")]
    NotificationExecutor(String),

    /// An error occurred in the domain layer.
    #[error("Domain error: {0}")]
    Domain(#[from] domain::DomainError),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An error occurred in the cluster layer.
    #[error("Cluster error: {0}")]
    Cluster(#[from] cluster::ClusterError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
