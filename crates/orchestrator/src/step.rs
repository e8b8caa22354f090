//! The fulfillment pipeline steps.

use serde::{Deserialize, Serialize};

/// One stage of the order fulfillment pipeline.
///
/// Steps advance strictly forward: VALIDATE → CHARGE_PAYMENT →
/// RESERVE_INVENTORY → SCHEDULE_FULFILLMENT → NOTIFY. There is no way
/// back; a failure moves the workflow sideways into compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStep {
    /// Check the order exists and is fit for fulfillment.
    Validate,

    /// Charge the customer's payment method.
    ChargePayment,

    /// Reserve stock for every line item.
    ReserveInventory,

    /// Book the order with the fulfillment provider.
    ScheduleFulfillment,

    /// Tell the customer their order is on its way.
    Notify,
}

impl WorkflowStep {
    /// The full pipeline in forward execution order.
    pub const PIPELINE: [WorkflowStep; 5] = [
        WorkflowStep::Validate,
        WorkflowStep::ChargePayment,
        WorkflowStep::ReserveInventory,
        WorkflowStep::ScheduleFulfillment,
        WorkflowStep::Notify,
    ];

    /// Returns the first step of the pipeline.
    pub fn first() -> Self {
        WorkflowStep::Validate
    }

    /// Returns the step after this one, or None at the end of the pipeline.
    pub fn next(&self) -> Option<Self> {
        match self {
            WorkflowStep::Validate => Some(WorkflowStep::ChargePayment),
            WorkflowStep::ChargePayment => Some(WorkflowStep::ReserveInventory),
            WorkflowStep::ReserveInventory => Some(WorkflowStep::ScheduleFulfillment),
            WorkflowStep::ScheduleFulfillment => Some(WorkflowStep::Notify),
            WorkflowStep::Notify => None,
        }
    }

    /// Returns true if this step has an external effect that must be
    /// undone when a later step fails.
    ///
    /// VALIDATE touches nothing outside the event store, and NOTIFY is
    /// fire-and-forget, so neither has a compensating action.
    pub fn has_compensation(&self) -> bool {
        matches!(
            self,
            WorkflowStep::ChargePayment
                | WorkflowStep::ReserveInventory
                | WorkflowStep::ScheduleFulfillment
        )
    }

    /// Returns true if a failure of this step triggers compensation.
    ///
    /// NOTIFY failures are logged but do not unwind the order.
    pub fn failure_compensates(&self) -> bool {
        !matches!(self, WorkflowStep::Notify)
    }

    /// Returns the step name as stored in events.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Validate => "VALIDATE",
            WorkflowStep::ChargePayment => "CHARGE_PAYMENT",
            WorkflowStep::ReserveInventory => "RESERVE_INVENTORY",
            WorkflowStep::ScheduleFulfillment => "SCHEDULE_FULFILLMENT",
            WorkflowStep::Notify => "NOTIFY",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
