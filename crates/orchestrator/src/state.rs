//! Workflow lifecycle states.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Workflow has not started yet.
    #[default]
    NotStarted,

    /// Workflow is executing forward through the pipeline.
    Running,

    /// A step failed; completed steps are being undone in reverse order.
    Compensating,

    /// All pipeline steps completed successfully.
    Completed,

    /// The workflow ended after compensation (or compensation itself
    /// failed and was escalated).
    Failed,
}

impl WorkflowState {
    /// Returns true if the workflow accepts step outcomes.
    pub fn accepts_outcomes(&self) -> bool {
        matches!(self, WorkflowState::Running)
    }

    /// Returns true if compensation can run from this state.
    pub fn can_compensate(&self) -> bool {
        matches!(self, WorkflowState::Running | WorkflowState::Compensating)
    }

    /// Returns true if the workflow has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::NotStarted => "NotStarted",
            WorkflowState::Running => "Running",
            WorkflowState::Compensating => "Compensating",
            WorkflowState::Completed => "Completed",
            WorkflowState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
