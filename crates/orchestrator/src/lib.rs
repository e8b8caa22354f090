//! Saga orchestration for order fulfillment.
//!
//! This crate drives one event-sourced workflow per order through the
//! fulfillment pipeline:
//! 1. Validate the order
//! 2. Charge payment
//! 3. Reserve inventory (one reservation per line item)
//! 4. Schedule fulfillment
//! 5. Notify the customer
//!
//! Step execution is asynchronous: the orchestrator dispatches a command,
//! persists that it is awaiting the outcome, and resumes when the matching
//! outcome arrives. A failed step unwinds the completed steps in reverse
//! order through compensating actions; a failed notification is the one
//! exception and still completes the workflow. A timeout monitor re-drives
//! workflows whose step deadline passed, and a cluster node handle ensures
//! only the partition owner ever acts on an order.

pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executors;
pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod step;
pub mod workflow;

pub use dead_letter::{DeadLetterRecord, DeadLetterStore, InMemoryDeadLetterStore};
pub use dispatch::{
    CompensationCommand, ExecutorDispatcher, RecordingDispatcher, StepCommand, StepDetail,
    StepDispatcher, StepFailure, StepOutcome, StepResult,
};
pub use error::OrchestratorError;
pub use events::WorkflowEvent;
pub use executors::{
    FulfillmentExecutor, FulfillmentTicket, InMemoryFulfillmentExecutor,
    InMemoryInventoryExecutor, InMemoryNotificationExecutor, InMemoryPaymentExecutor,
    InventoryExecutor, NotificationExecutor, PaymentExecutor, PaymentReceipt, Reservation,
};
pub use monitor::TimeoutMonitor;
pub use orchestrator::{Orchestrator, DEFAULT_STEP_TIMEOUT};
pub use retry::RetryPolicy;
pub use state::WorkflowState;
pub use step::WorkflowStep;
pub use workflow::{CompensationAction, CompensationStatus, WorkflowInstance};
