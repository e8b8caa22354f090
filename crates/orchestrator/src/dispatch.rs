//! Step command dispatch.
//!
//! The orchestrator never calls executors directly while moving forward:
//! it hands a [`StepCommand`] to a [`StepDispatcher`] and resumes when the
//! matching [`StepOutcome`] is delivered back. Compensating actions go the
//! other way: they are awaited inline so each undo is confirmed before the
//! previous step is touched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};
use domain::{Money, OrderItem, Sku};
use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, Result};
use crate::executors::{
    FulfillmentExecutor, InventoryExecutor, NotificationExecutor, PaymentExecutor,
};
use crate::step::WorkflowStep;

/// A forward step command bound for an external executor.
#[derive(Debug, Clone)]
pub enum StepCommand {
    /// Charge the customer.
    ChargePayment {
        workflow_id: AggregateId,
        order_id: AggregateId,
        amount: Money,
        correlation_id: CorrelationId,
    },

    /// Reserve stock for every line item (scatter-gather).
    ReserveInventory {
        workflow_id: AggregateId,
        order_id: AggregateId,
        items: Vec<OrderItem>,
        correlation_id: CorrelationId,
    },

    /// Book the order with the fulfillment provider.
    ScheduleFulfillment {
        workflow_id: AggregateId,
        order_id: AggregateId,
        correlation_id: CorrelationId,
    },

    /// Tell the customer about the order.
    Notify {
        workflow_id: AggregateId,
        order_id: AggregateId,
        event_type: String,
        correlation_id: CorrelationId,
    },
}

impl StepCommand {
    /// Returns the pipeline step this command executes.
    pub fn step(&self) -> WorkflowStep {
        match self {
            StepCommand::ChargePayment { .. } => WorkflowStep::ChargePayment,
            StepCommand::ReserveInventory { .. } => WorkflowStep::ReserveInventory,
            StepCommand::ScheduleFulfillment { .. } => WorkflowStep::ScheduleFulfillment,
            StepCommand::Notify { .. } => WorkflowStep::Notify,
        }
    }

    /// Returns the workflow the command belongs to.
    pub fn workflow_id(&self) -> AggregateId {
        match self {
            StepCommand::ChargePayment { workflow_id, .. }
            | StepCommand::ReserveInventory { workflow_id, .. }
            | StepCommand::ScheduleFulfillment { workflow_id, .. }
            | StepCommand::Notify { workflow_id, .. } => *workflow_id,
        }
    }

    /// Returns the correlation ID the outcome must carry.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            StepCommand::ChargePayment { correlation_id, .. }
            | StepCommand::ReserveInventory { correlation_id, .. }
            | StepCommand::ScheduleFulfillment { correlation_id, .. }
            | StepCommand::Notify { correlation_id, .. } => *correlation_id,
        }
    }
}

/// A compensating action for one completed step.
#[derive(Debug, Clone)]
pub enum CompensationCommand {
    /// Refund a charged payment.
    RefundPayment {
        workflow_id: AggregateId,
        order_id: AggregateId,
        payment_id: String,
        amount: Money,
        correlation_id: CorrelationId,
    },

    /// Release held reservations.
    ReleaseInventory {
        workflow_id: AggregateId,
        order_id: AggregateId,
        reservation_ids: Vec<String>,
        correlation_id: CorrelationId,
    },

    /// Cancel a scheduled fulfillment.
    CancelFulfillment {
        workflow_id: AggregateId,
        order_id: AggregateId,
        tracking_number: String,
        correlation_id: CorrelationId,
    },
}

impl CompensationCommand {
    /// Returns the step this command undoes.
    pub fn step(&self) -> WorkflowStep {
        match self {
            CompensationCommand::RefundPayment { .. } => WorkflowStep::ChargePayment,
            CompensationCommand::ReleaseInventory { .. } => WorkflowStep::ReserveInventory,
            CompensationCommand::CancelFulfillment { .. } => WorkflowStep::ScheduleFulfillment,
        }
    }
}

/// Context a successful step hands back to the workflow.
#[derive(Debug, Clone, Default)]
pub struct StepDetail {
    /// Payment ID (CHARGE_PAYMENT).
    pub payment_id: Option<String>,
    /// Reservation IDs, one per line item (RESERVE_INVENTORY).
    pub reservation_ids: Vec<String>,
    /// Tracking number (SCHEDULE_FULFILLMENT).
    pub tracking_number: Option<String>,
}

/// Detail of a failed step.
#[derive(Debug, Clone, Default)]
pub struct StepFailure {
    /// Human-readable failure reason.
    pub reason: String,
    /// SKUs that could not be reserved (RESERVE_INVENTORY only).
    pub unavailable_skus: Vec<Sku>,
}

/// The result half of a step outcome.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// The step's external work succeeded.
    Success(StepDetail),
    /// The step's external work failed.
    Failure(StepFailure),
}

/// A step executor's response, delivered back to the orchestrator.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The workflow the outcome belongs to.
    pub workflow_id: AggregateId,
    /// The step that finished.
    pub step: WorkflowStep,
    /// The correlation ID of the dispatch being answered.
    pub correlation_id: CorrelationId,
    /// Success or failure detail.
    pub result: StepResult,
}

impl StepOutcome {
    /// Creates a success outcome.
    pub fn success(
        workflow_id: AggregateId,
        step: WorkflowStep,
        correlation_id: CorrelationId,
        detail: StepDetail,
    ) -> Self {
        Self {
            workflow_id,
            step,
            correlation_id,
            result: StepResult::Success(detail),
        }
    }

    /// Creates a failure outcome.
    pub fn failure(
        workflow_id: AggregateId,
        step: WorkflowStep,
        correlation_id: CorrelationId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            step,
            correlation_id,
            result: StepResult::Failure(StepFailure {
                reason: reason.into(),
                unavailable_skus: vec![],
            }),
        }
    }

    /// Returns true if the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.result, StepResult::Success(_))
    }
}

/// Boundary between the orchestrator and step executors.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// Dispatches a forward step command without waiting for its outcome.
    async fn dispatch(&self, command: StepCommand) -> Result<()>;

    /// Executes a compensating action and waits for confirmation.
    async fn compensate(&self, command: CompensationCommand) -> Result<()>;
}

/// Dispatcher backed by concrete executors.
///
/// Forward commands run on spawned tasks; their outcomes come back on an
/// mpsc channel the caller drains into `Orchestrator::on_step_result`.
/// RESERVE_INVENTORY scatter-gathers one reservation per line item and
/// releases the partial successes itself when any item fails, so the
/// workflow only ever sees one aggregated outcome per step.
pub struct ExecutorDispatcher<P, I, F, N> {
    payment: P,
    inventory: I,
    fulfillment: F,
    notification: N,
    outcomes: mpsc::UnboundedSender<StepOutcome>,
}

impl<P, I, F, N> ExecutorDispatcher<P, I, F, N>
where
    P: PaymentExecutor + Clone + 'static,
    I: InventoryExecutor + Clone + 'static,
    F: FulfillmentExecutor + Clone + 'static,
    N: NotificationExecutor + Clone + 'static,
{
    /// Creates a dispatcher and the receiver its outcomes arrive on.
    pub fn new(
        payment: P,
        inventory: I,
        fulfillment: F,
        notification: N,
    ) -> (Self, mpsc::UnboundedReceiver<StepOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                payment,
                inventory,
                fulfillment,
                notification,
                outcomes: tx,
            },
            rx,
        )
    }

    fn deliver(outcomes: &mpsc::UnboundedSender<StepOutcome>, outcome: StepOutcome) {
        if outcomes.send(outcome).is_err() {
            tracing::warn!("outcome receiver dropped, step result lost");
        }
    }

    /// Reserves all items in parallel; on any failure, releases the
    /// reservations that did succeed before reporting the aggregate
    /// failure.
    async fn reserve_all(
        inventory: &I,
        order_id: AggregateId,
        items: &[OrderItem],
        correlation_id: CorrelationId,
    ) -> StepResult {
        let results = join_all(
            items
                .iter()
                .map(|item| inventory.reserve(order_id, item, correlation_id)),
        )
        .await;

        let mut reserved = Vec::new();
        let mut unavailable = Vec::new();
        for (item, result) in items.iter().zip(results) {
            match result {
                Ok(reservation) => reserved.push(reservation.reservation_id),
                Err(e) => {
                    tracing::debug!(sku = %item.sku, error = %e, "item reservation failed");
                    unavailable.push(item.sku.clone());
                }
            }
        }

        if unavailable.is_empty() {
            return StepResult::Success(StepDetail {
                reservation_ids: reserved,
                ..StepDetail::default()
            });
        }

        for reservation_id in &reserved {
            if let Err(e) = inventory.release(reservation_id).await {
                tracing::warn!(
                    %reservation_id,
                    error = %e,
                    "failed to release partial reservation"
                );
            }
        }

        let skus: Vec<String> = unavailable.iter().map(|sku| sku.to_string()).collect();
        StepResult::Failure(StepFailure {
            reason: format!("OUT_OF_STOCK: {}", skus.join(", ")),
            unavailable_skus: unavailable,
        })
    }
}

#[async_trait]
impl<P, I, F, N> StepDispatcher for ExecutorDispatcher<P, I, F, N>
where
    P: PaymentExecutor + Clone + 'static,
    I: InventoryExecutor + Clone + 'static,
    F: FulfillmentExecutor + Clone + 'static,
    N: NotificationExecutor + Clone + 'static,
{
    async fn dispatch(&self, command: StepCommand) -> Result<()> {
        let outcomes = self.outcomes.clone();
        let step = command.step();
        let workflow_id = command.workflow_id();
        let correlation_id = command.correlation_id();

        match command {
            StepCommand::ChargePayment {
                order_id, amount, ..
            } => {
                let payment = self.payment.clone();
                tokio::spawn(async move {
                    let result = match payment.charge(order_id, amount, correlation_id).await {
                        Ok(receipt) => StepResult::Success(StepDetail {
                            payment_id: Some(receipt.payment_id),
                            ..StepDetail::default()
                        }),
                        Err(e) => StepResult::Failure(StepFailure {
                            reason: e.to_string(),
                            unavailable_skus: vec![],
                        }),
                    };
                    Self::deliver(
                        &outcomes,
                        StepOutcome {
                            workflow_id,
                            step,
                            correlation_id,
                            result,
                        },
                    );
                });
            }
            StepCommand::ReserveInventory {
                order_id, items, ..
            } => {
                let inventory = self.inventory.clone();
                tokio::spawn(async move {
                    let result =
                        Self::reserve_all(&inventory, order_id, &items, correlation_id).await;
                    Self::deliver(
                        &outcomes,
                        StepOutcome {
                            workflow_id,
                            step,
                            correlation_id,
                            result,
                        },
                    );
                });
            }
            StepCommand::ScheduleFulfillment { order_id, .. } => {
                let fulfillment = self.fulfillment.clone();
                tokio::spawn(async move {
                    let result = match fulfillment.schedule(order_id, correlation_id).await {
                        Ok(ticket) => StepResult::Success(StepDetail {
                            tracking_number: Some(ticket.tracking_number),
                            ..StepDetail::default()
                        }),
                        Err(e) => StepResult::Failure(StepFailure {
                            reason: e.to_string(),
                            unavailable_skus: vec![],
                        }),
                    };
                    Self::deliver(
                        &outcomes,
                        StepOutcome {
                            workflow_id,
                            step,
                            correlation_id,
                            result,
                        },
                    );
                });
            }
            StepCommand::Notify {
                order_id,
                event_type,
                ..
            } => {
                let notification = self.notification.clone();
                tokio::spawn(async move {
                    let result = match notification
                        .notify(order_id, &event_type, correlation_id)
                        .await
                    {
                        Ok(()) => StepResult::Success(StepDetail::default()),
                        Err(e) => StepResult::Failure(StepFailure {
                            reason: e.to_string(),
                            unavailable_skus: vec![],
                        }),
                    };
                    Self::deliver(
                        &outcomes,
                        StepOutcome {
                            workflow_id,
                            step,
                            correlation_id,
                            result,
                        },
                    );
                });
            }
        }

        Ok(())
    }

    async fn compensate(&self, command: CompensationCommand) -> Result<()> {
        match command {
            CompensationCommand::RefundPayment {
                order_id,
                payment_id,
                amount,
                correlation_id,
                ..
            } => {
                self.payment
                    .refund(order_id, &payment_id, amount, correlation_id)
                    .await
            }
            CompensationCommand::ReleaseInventory {
                reservation_ids, ..
            } => {
                for reservation_id in &reservation_ids {
                    self.inventory.release(reservation_id).await?;
                }
                Ok(())
            }
            CompensationCommand::CancelFulfillment {
                tracking_number, ..
            } => self.fulfillment.cancel(&tracking_number).await,
        }
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    dispatched: Vec<StepCommand>,
    compensated: Vec<CompensationCommand>,
    fail_compensation_for: HashSet<WorkflowStep>,
}

/// Dispatcher that records commands without executing anything.
///
/// Tests drive the workflow deterministically by manufacturing the
/// outcomes themselves.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDispatcher {
    /// Creates a new recording dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every forward command dispatched so far.
    pub fn dispatched(&self) -> Vec<StepCommand> {
        self.state.lock().unwrap().dispatched.clone()
    }

    /// Returns the most recent forward dispatch.
    pub fn last_dispatch(&self) -> Option<StepCommand> {
        self.state.lock().unwrap().dispatched.last().cloned()
    }

    /// Returns every compensating action executed so far.
    pub fn compensated(&self) -> Vec<CompensationCommand> {
        self.state.lock().unwrap().compensated.clone()
    }

    /// Makes compensation of the given step fail.
    pub fn set_fail_compensation(&self, step: WorkflowStep) {
        self.state
            .lock()
            .unwrap()
            .fail_compensation_for
            .insert(step);
    }
}

#[async_trait]
impl StepDispatcher for RecordingDispatcher {
    async fn dispatch(&self, command: StepCommand) -> Result<()> {
        self.state.lock().unwrap().dispatched.push(command);
        Ok(())
    }

    async fn compensate(&self, command: CompensationCommand) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let step = command.step();
        if state.fail_compensation_for.contains(&step) {
            return Err(OrchestratorError::PaymentExecutor(format!(
                "compensation of {step} refused"
            )));
        }
        state.compensated.push(command);
        Ok(())
    }
}
