//! Workflow instance aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use domain::Aggregate;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::events::WorkflowEvent;
use crate::state::WorkflowState;
use crate::step::WorkflowStep;

/// Lifecycle of a single compensating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationStatus {
    /// Scheduled but not yet confirmed.
    Pending,
    /// The undo was confirmed by the executor.
    Applied,
    /// Retries exhausted; needs operator attention.
    Failed,
}

/// A compensating action for one completed step.
///
/// Actions are created only for steps that actually completed, in the
/// exact reverse of the completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAction {
    /// The step being undone.
    pub step: WorkflowStep,
    /// Where the action is in its lifecycle.
    pub status: CompensationStatus,
    /// How many attempts have been made.
    pub attempt: u32,
}

impl CompensationAction {
    fn pending(step: WorkflowStep) -> Self {
        Self {
            step,
            status: CompensationStatus::Pending,
            attempt: 0,
        }
    }
}

/// An event-sourced saga workflow instance.
///
/// Tracks pipeline progress, the correlation ID of the outcome currently
/// awaited, and the context needed to compensate (payment ID, reservation
/// IDs, tracking number). State is derived purely by folding events, so
/// recovery after a crash is a read plus replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInstance {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<AggregateId>,
    state: WorkflowState,
    current_step: Option<WorkflowStep>,
    completed_steps: Vec<WorkflowStep>,
    /// Correlation ID of the dispatch whose outcome is awaited.
    pending_correlation: Option<CorrelationId>,
    /// Dispatch attempt for the current step.
    attempt: u32,
    started_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
    compensations: Vec<CompensationAction>,
    payment_id: Option<String>,
    reservation_ids: Vec<String>,
    tracking_number: Option<String>,
    failure_reason: Option<String>,
}

impl Aggregate for WorkflowInstance {
    type Event = WorkflowEvent;
    type Error = OrchestratorError;

    fn aggregate_type() -> &'static str {
        "OrderWorkflow"
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
            WorkflowEvent::WorkflowStarted(data) => {
                self.id = Some(data.workflow_id);
                self.order_id = Some(data.order_id);
                self.state = WorkflowState::Running;
                self.current_step = Some(WorkflowStep::first());
                self.started_at = Some(data.started_at);
                self.deadline_at = Some(data.deadline_at);
            }
            WorkflowEvent::StepDispatched(data) => {
                self.current_step = Some(data.step);
                self.pending_correlation = Some(data.correlation_id);
                self.attempt = data.attempt;
                self.deadline_at = Some(data.deadline_at);
            }
            WorkflowEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step);
                self.current_step = data.step.next();
                self.pending_correlation = None;
                self.attempt = 0;
                if let Some(pid) = data.payment_id {
                    self.payment_id = Some(pid);
                }
                self.reservation_ids.extend(data.reservation_ids);
                if let Some(tn) = data.tracking_number {
                    self.tracking_number = Some(tn);
                }
            }
            WorkflowEvent::StepFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.pending_correlation = None;
            }
            WorkflowEvent::CompensationStarted(_) => {
                self.state = WorkflowState::Compensating;
                self.compensations = self
                    .completed_steps
                    .iter()
                    .rev()
                    .filter(|step| step.has_compensation())
                    .map(|step| CompensationAction::pending(*step))
                    .collect();
            }
            WorkflowEvent::CompensationApplied(data) => {
                if let Some(action) = self
                    .compensations
                    .iter_mut()
                    .find(|a| a.step == data.step)
                {
                    action.status = CompensationStatus::Applied;
                    action.attempt = data.attempt;
                }
            }
            WorkflowEvent::CompensationFailed(data) => {
                if let Some(action) = self
                    .compensations
                    .iter_mut()
                    .find(|a| a.step == data.step)
                {
                    action.status = CompensationStatus::Failed;
                    action.attempt = data.attempt;
                }
            }
            WorkflowEvent::WorkflowCompleted(_) => {
                self.state = WorkflowState::Completed;
                self.current_step = None;
                self.pending_correlation = None;
            }
            WorkflowEvent::WorkflowFailed(data) => {
                self.state = WorkflowState::Failed;
                self.current_step = None;
                self.pending_correlation = None;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl WorkflowInstance {
    /// Returns the workflow state.
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Returns the order this workflow is fulfilling.
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    /// Returns the pipeline step the workflow is at, None when terminal.
    pub fn current_step(&self) -> Option<WorkflowStep> {
        self.current_step
    }

    /// Returns the steps completed so far, in completion order.
    pub fn completed_steps(&self) -> &[WorkflowStep] {
        &self.completed_steps
    }

    /// Returns the correlation ID of the outcome currently awaited.
    pub fn pending_correlation(&self) -> Option<CorrelationId> {
        self.pending_correlation
    }

    /// Returns the dispatch attempt for the current step (0 when idle).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns when the workflow started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the deadline after which the workflow counts as stuck.
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline_at
    }

    /// Returns true if the workflow is non-terminal and past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal()
            && self.state != WorkflowState::NotStarted
            && self.deadline_at.is_some_and(|deadline| deadline < now)
    }

    /// Returns the compensating actions, in execution (reverse) order.
    pub fn compensations(&self) -> &[CompensationAction] {
        &self.compensations
    }

    /// Returns the next compensating action still pending, if any.
    pub fn next_pending_compensation(&self) -> Option<&CompensationAction> {
        self.compensations
            .iter()
            .find(|a| a.status == CompensationStatus::Pending)
    }

    /// Returns the payment ID, if the charge completed.
    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    /// Returns the reservation IDs gathered so far.
    pub fn reservation_ids(&self) -> &[String] {
        &self.reservation_ids
    }

    /// Returns the tracking number, if fulfillment was scheduled.
    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    /// Returns the failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    fn require_id(&self) -> Result<AggregateId, OrchestratorError> {
        self.id.ok_or(OrchestratorError::InvalidState {
            expected: "started".to_string(),
            actual: self.state.to_string(),
        })
    }

    fn check_outcome(
        &self,
        step: WorkflowStep,
        correlation_id: CorrelationId,
    ) -> Result<(), OrchestratorError> {
        let workflow_id = self.require_id()?;

        if !self.state.accepts_outcomes() {
            return Err(OrchestratorError::InvalidState {
                expected: WorkflowState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }

        if self.current_step != Some(step) {
            return Err(OrchestratorError::OutOfOrderOutcome {
                workflow_id,
                awaiting: self.current_step,
                received: step,
            });
        }

        if self.pending_correlation != Some(correlation_id) {
            return Err(OrchestratorError::StaleOutcome {
                workflow_id,
                step,
                correlation_id,
            });
        }

        Ok(())
    }
}

// Command methods
impl WorkflowInstance {
    /// Accepts a success outcome for the awaited step.
    ///
    /// Rejects outcomes for a step the workflow is not at, and outcomes
    /// whose correlation ID is not the one pending (duplicates, responses
    /// to a dispatch the timeout monitor already superseded).
    pub fn complete_step(
        &self,
        step: WorkflowStep,
        correlation_id: CorrelationId,
        payment_id: Option<String>,
        reservation_ids: Vec<String>,
        tracking_number: Option<String>,
    ) -> Result<Vec<WorkflowEvent>, OrchestratorError> {
        self.check_outcome(step, correlation_id)?;

        let mut events = vec![WorkflowEvent::step_completed(
            step,
            payment_id,
            reservation_ids,
            tracking_number,
        )];
        if step.next().is_none() {
            events.push(WorkflowEvent::workflow_completed());
        }
        Ok(events)
    }

    /// Accepts a failure outcome for the awaited step.
    ///
    /// A failed NOTIFY is recorded but still completes the workflow; any
    /// other failure moves the workflow into compensation.
    pub fn fail_step(
        &self,
        step: WorkflowStep,
        correlation_id: CorrelationId,
        reason: impl Into<String>,
    ) -> Result<Vec<WorkflowEvent>, OrchestratorError> {
        self.check_outcome(step, correlation_id)?;

        let mut events = vec![WorkflowEvent::step_failed(step, reason)];
        if step.failure_compensates() {
            events.push(WorkflowEvent::compensation_started(step));
        } else {
            events.push(WorkflowEvent::workflow_completed());
        }
        Ok(events)
    }

    /// Forces the workflow into compensation from outside a step outcome,
    /// used when the retry budget for a stuck step is exhausted or when a
    /// cancellation arrives mid-flight.
    pub fn force_compensation(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<WorkflowEvent>, OrchestratorError> {
        self.require_id()?;

        if !self.state.accepts_outcomes() {
            return Err(OrchestratorError::InvalidState {
                expected: WorkflowState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }

        let step = self.current_step.unwrap_or(WorkflowStep::Validate);
        Ok(vec![
            WorkflowEvent::step_failed(step, reason),
            WorkflowEvent::compensation_started(step),
        ])
    }
}
