//! Workflow domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::step::WorkflowStep;

/// Events that can occur during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    /// Workflow execution started.
    WorkflowStarted(WorkflowStartedData),

    /// A step command was dispatched to its executor; the workflow is now
    /// awaiting the matching outcome.
    StepDispatched(StepDispatchedData),

    /// A step completed successfully.
    StepCompleted(StepCompletedData),

    /// A step failed.
    StepFailed(StepFailedData),

    /// Compensation started after a step failure.
    CompensationStarted(CompensationStartedData),

    /// A compensating action was confirmed.
    CompensationApplied(CompensationAppliedData),

    /// A compensating action exhausted its retries.
    CompensationFailed(CompensationFailedData),

    /// Workflow completed successfully.
    WorkflowCompleted(WorkflowCompletedData),

    /// Workflow ended in failure after compensation.
    WorkflowFailed(WorkflowFailedData),
}

impl DomainEvent for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted(_) => "WorkflowStarted",
            WorkflowEvent::StepDispatched(_) => "StepDispatched",
            WorkflowEvent::StepCompleted(_) => "StepCompleted",
            WorkflowEvent::StepFailed(_) => "StepFailed",
            WorkflowEvent::CompensationStarted(_) => "CompensationStarted",
            WorkflowEvent::CompensationApplied(_) => "CompensationApplied",
            WorkflowEvent::CompensationFailed(_) => "CompensationFailed",
            WorkflowEvent::WorkflowCompleted(_) => "WorkflowCompleted",
            WorkflowEvent::WorkflowFailed(_) => "WorkflowFailed",
        }
    }
}

/// Data for WorkflowStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStartedData {
    /// The workflow instance ID.
    pub workflow_id: AggregateId,
    /// The order being fulfilled.
    pub order_id: AggregateId,
    /// When the workflow started.
    pub started_at: DateTime<Utc>,
    /// When the workflow is considered stuck if still in flight.
    pub deadline_at: DateTime<Utc>,
}

/// Data for StepDispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDispatchedData {
    /// The step that was dispatched.
    pub step: WorkflowStep,
    /// The correlation ID the outcome must carry to be accepted.
    pub correlation_id: CorrelationId,
    /// Dispatch attempt for this step, starting at 1.
    pub attempt: u32,
    /// Refreshed deadline for the awaited outcome.
    pub deadline_at: DateTime<Utc>,
    /// When the command was dispatched.
    pub dispatched_at: DateTime<Utc>,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    /// The completed step.
    pub step: WorkflowStep,
    /// Payment ID (set after CHARGE_PAYMENT).
    pub payment_id: Option<String>,
    /// Reservation IDs (set after RESERVE_INVENTORY, one per line item).
    pub reservation_ids: Vec<String>,
    /// Tracking number (set after SCHEDULE_FULFILLMENT).
    pub tracking_number: Option<String>,
}

/// Data for StepFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    /// The step that failed.
    pub step: WorkflowStep,
    /// Error message describing the failure.
    pub reason: String,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStartedData {
    /// The step whose failure triggered compensation.
    pub from_step: WorkflowStep,
}

/// Data for CompensationApplied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAppliedData {
    /// The step that was undone.
    pub step: WorkflowStep,
    /// The attempt on which the compensating action succeeded.
    pub attempt: u32,
}

/// Data for CompensationFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationFailedData {
    /// The step whose compensation gave up.
    pub step: WorkflowStep,
    /// The final attempt number.
    pub attempt: u32,
    /// Error message from the last attempt.
    pub reason: String,
}

/// Data for WorkflowCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCompletedData {
    /// When the workflow completed.
    pub completed_at: DateTime<Utc>,
}

/// Data for WorkflowFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFailedData {
    /// Reason for failure.
    pub reason: String,
    /// When the workflow failed.
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl WorkflowEvent {
    /// Creates a WorkflowStarted event.
    pub fn workflow_started(
        workflow_id: AggregateId,
        order_id: AggregateId,
        deadline_at: DateTime<Utc>,
    ) -> Self {
        WorkflowEvent::WorkflowStarted(WorkflowStartedData {
            workflow_id,
            order_id,
            started_at: Utc::now(),
            deadline_at,
        })
    }

    /// Creates a StepDispatched event.
    pub fn step_dispatched(
        step: WorkflowStep,
        correlation_id: CorrelationId,
        attempt: u32,
        deadline_at: DateTime<Utc>,
    ) -> Self {
        WorkflowEvent::StepDispatched(StepDispatchedData {
            step,
            correlation_id,
            attempt,
            deadline_at,
            dispatched_at: Utc::now(),
        })
    }

    /// Creates a StepCompleted event.
    pub fn step_completed(
        step: WorkflowStep,
        payment_id: Option<String>,
        reservation_ids: Vec<String>,
        tracking_number: Option<String>,
    ) -> Self {
        WorkflowEvent::StepCompleted(StepCompletedData {
            step,
            payment_id,
            reservation_ids,
            tracking_number,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(step: WorkflowStep, reason: impl Into<String>) -> Self {
        WorkflowEvent::StepFailed(StepFailedData {
            step,
            reason: reason.into(),
        })
    }

    /// Creates a CompensationStarted event.
    pub fn compensation_started(from_step: WorkflowStep) -> Self {
        WorkflowEvent::CompensationStarted(CompensationStartedData { from_step })
    }

    /// Creates a CompensationApplied event.
    pub fn compensation_applied(step: WorkflowStep, attempt: u32) -> Self {
        WorkflowEvent::CompensationApplied(CompensationAppliedData { step, attempt })
    }

    /// Creates a CompensationFailed event.
    pub fn compensation_failed(
        step: WorkflowStep,
        attempt: u32,
        reason: impl Into<String>,
    ) -> Self {
        WorkflowEvent::CompensationFailed(CompensationFailedData {
            step,
            attempt,
            reason: reason.into(),
        })
    }

    /// Creates a WorkflowCompleted event.
    pub fn workflow_completed() -> Self {
        WorkflowEvent::WorkflowCompleted(WorkflowCompletedData {
            completed_at: Utc::now(),
        })
    }

    /// Creates a WorkflowFailed event.
    pub fn workflow_failed(reason: impl Into<String>) -> Self {
        WorkflowEvent::WorkflowFailed(WorkflowFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
