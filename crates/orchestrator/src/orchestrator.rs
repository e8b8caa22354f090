//! The saga orchestrator.
//!
//! Drives one workflow instance per order through the fulfillment
//! pipeline. All progress is event-sourced: each dispatch and each outcome
//! is appended to the workflow's stream before anything else happens, so a
//! node that crashes mid-saga recovers by folding the stream and finds
//! itself exactly where it left off.
//!
//! The orchestrator only acts on orders whose partition this node holds.
//! Commands for orders owned elsewhere are rejected with the current
//! owner's identity so callers can re-route.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use domain::{Aggregate, CancelOrder, CreateOrder, DomainEvent, Order, OrderService, OrderStatus};
use event_store::{AppendOptions, EventQuery, EventStore, NewEvent, Version};

use cluster::{Admission, ClusterNode, IdempotencyTracker, LeaseCoordinator};

use crate::dead_letter::{DeadLetterRecord, DeadLetterStore, InMemoryDeadLetterStore};
use crate::dispatch::{CompensationCommand, StepCommand, StepDispatcher, StepOutcome, StepResult};
use crate::error::{OrchestratorError, Result};
use crate::events::WorkflowEvent;
use crate::retry::RetryPolicy;
use crate::state::WorkflowState;
use crate::step::WorkflowStep;
use crate::workflow::WorkflowInstance;

/// Default time a single dispatched step may stay unanswered.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Event-driven saga orchestrator over a shared event store.
pub struct Orchestrator<S, D, T, C>
where
    S: EventStore + Clone,
    D: StepDispatcher,
    T: IdempotencyTracker,
    C: LeaseCoordinator,
{
    store: S,
    orders: OrderService<S>,
    dispatcher: D,
    idempotency: T,
    node: ClusterNode<C>,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterStore>,
    step_timeout: Duration,
}

impl<S, D, T, C> Orchestrator<S, D, T, C>
where
    S: EventStore + Clone,
    D: StepDispatcher,
    T: IdempotencyTracker,
    C: LeaseCoordinator,
{
    /// Creates an orchestrator with default retry and timeout settings.
    pub fn new(store: S, dispatcher: D, idempotency: T, node: ClusterNode<C>) -> Self {
        Self {
            orders: OrderService::new(store.clone()),
            store,
            dispatcher,
            idempotency,
            node,
            retry: RetryPolicy::default(),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Replaces the compensation retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the dead-letter sink.
    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = store;
        self
    }

    /// Replaces the per-step outcome deadline.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Returns the order service sharing this orchestrator's store.
    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    /// Returns this node's cluster handle.
    pub fn node(&self) -> &ClusterNode<C> {
        &self.node
    }

    /// Accepts an order creation command and starts its workflow.
    ///
    /// The correlation ID is the idempotency key: a retry of an already
    /// processed command returns the original workflow ID without creating
    /// anything, and a retry racing the original gets `CommandInFlight`.
    /// A create that fails releases its admission, so the same correlation
    /// ID may be retried immediately.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, %correlation_id))]
    pub async fn handle_create_order(
        &self,
        cmd: CreateOrder,
        correlation_id: CorrelationId,
    ) -> Result<AggregateId> {
        let order_id = cmd.order_id;
        self.ensure_leader(order_id).await?;

        match self.idempotency.admit(correlation_id).await? {
            Admission::Admitted => {}
            Admission::AlreadyProcessed(record) => {
                if let Some(workflow_id) = record
                    .result_ref
                    .as_ref()
                    .and_then(|r| r.get("workflow_id"))
                    .and_then(|v| serde_json::from_value::<AggregateId>(v.clone()).ok())
                {
                    tracing::info!(%workflow_id, "duplicate create returned recorded workflow");
                    return Ok(workflow_id);
                }
                return Err(OrchestratorError::CommandInFlight(correlation_id));
            }
        }

        let workflow_id = match self.create_and_start(cmd, correlation_id).await {
            Ok(workflow_id) => workflow_id,
            Err(e) => {
                // Give the admission back so a retry is not stuck behind a
                // resultless record until the TTL expires.
                if let Err(release_err) = self.idempotency.release(correlation_id).await {
                    tracing::warn!(%correlation_id, error = %release_err, "failed to release admission");
                }
                return Err(e);
            }
        };

        self.idempotency
            .record_result(
                correlation_id,
                serde_json::json!({ "workflow_id": workflow_id }),
            )
            .await?;

        metrics::counter!("orchestrator_orders_accepted_total").increment(1);
        Ok(workflow_id)
    }

    async fn create_and_start(
        &self,
        cmd: CreateOrder,
        correlation_id: CorrelationId,
    ) -> Result<AggregateId> {
        let order_id = cmd.order_id;
        self.orders.create_order(cmd, correlation_id).await?;
        self.start(order_id).await
    }

    /// Starts the fulfillment workflow for an existing order.
    ///
    /// VALIDATE runs inline: the order must exist, be PENDING and have at
    /// least one line item. On success the first external step,
    /// CHARGE_PAYMENT, is already dispatched when this returns.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, order_id: AggregateId) -> Result<AggregateId> {
        self.ensure_leader(order_id).await?;

        if let Some(existing) = self.find_workflow_for_order(order_id).await? {
            return Err(OrchestratorError::AlreadyStarted(existing));
        }

        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(OrchestratorError::OrderNotFound(order_id))?;

        if order.status() != OrderStatus::Pending {
            return Err(OrchestratorError::OrderNotReady(format!(
                "order is {}, expected PENDING",
                order.status()
            )));
        }
        if order.items().is_empty() {
            return Err(OrchestratorError::OrderNotReady(
                "order has no line items".to_string(),
            ));
        }

        let workflow_id = AggregateId::new();
        let deadline = Utc::now() + self.step_deadline();
        let dispatch_correlation = self.fresh_dispatch_correlation().await?;

        let events = vec![
            WorkflowEvent::workflow_started(workflow_id, order_id, deadline),
            WorkflowEvent::step_completed(WorkflowStep::Validate, None, vec![], None),
            WorkflowEvent::step_dispatched(
                WorkflowStep::ChargePayment,
                dispatch_correlation,
                1,
                deadline,
            ),
        ];
        self.append_workflow(workflow_id, Version::initial(), &events, dispatch_correlation)
            .await?;

        self.dispatcher
            .dispatch(StepCommand::ChargePayment {
                workflow_id,
                order_id,
                amount: order.total_amount(),
                correlation_id: dispatch_correlation,
            })
            .await?;

        metrics::counter!("orchestrator_workflows_started_total").increment(1);
        tracing::info!(%workflow_id, %order_id, "workflow started");
        Ok(workflow_id)
    }

    /// Applies a step outcome delivered by an executor.
    ///
    /// Outcomes for a step the workflow is not awaiting, or carrying a
    /// correlation ID other than the pending one, are rejected without
    /// touching state; that is how redeliveries and responses to
    /// superseded dispatches are shed.
    #[tracing::instrument(
        skip(self, outcome),
        fields(workflow_id = %outcome.workflow_id, step = %outcome.step)
    )]
    pub async fn on_step_result(&self, outcome: StepOutcome) -> Result<()> {
        let mut workflow = self.load_workflow(outcome.workflow_id).await?;
        let order_id = workflow
            .order_id()
            .ok_or(OrchestratorError::WorkflowNotFound(outcome.workflow_id))?;
        self.ensure_leader(order_id).await?;

        match outcome.result {
            StepResult::Success(detail) => {
                // Reject before any event is appended: a success without
                // the reference its step must produce cannot be recorded.
                let missing = match outcome.step {
                    WorkflowStep::ChargePayment if detail.payment_id.is_none() => {
                        Some("payment ID")
                    }
                    WorkflowStep::ScheduleFulfillment if detail.tracking_number.is_none() => {
                        Some("tracking number")
                    }
                    _ => None,
                };
                if let Some(missing) = missing {
                    tracing::warn!(
                        workflow_id = %outcome.workflow_id,
                        step = %outcome.step,
                        missing,
                        "rejecting malformed step outcome"
                    );
                    return Err(OrchestratorError::MalformedOutcome {
                        workflow_id: outcome.workflow_id,
                        step: outcome.step,
                        missing,
                    });
                }

                let events = workflow.complete_step(
                    outcome.step,
                    outcome.correlation_id,
                    detail.payment_id.clone(),
                    detail.reservation_ids.clone(),
                    detail.tracking_number.clone(),
                )?;
                let version = self
                    .append_workflow(
                        outcome.workflow_id,
                        workflow.version(),
                        &events,
                        outcome.correlation_id,
                    )
                    .await?;
                workflow.apply_events(events);
                workflow.set_version(version);

                match outcome.step {
                    WorkflowStep::ChargePayment => {
                        let payment_id =
                            detail
                                .payment_id
                                .ok_or(OrchestratorError::MalformedOutcome {
                                    workflow_id: outcome.workflow_id,
                                    step: outcome.step,
                                    missing: "payment ID",
                                })?;
                        self.orders
                            .confirm_payment(order_id, payment_id, outcome.correlation_id)
                            .await?;
                    }
                    WorkflowStep::ReserveInventory => {
                        self.orders
                            .mark_reserved(
                                order_id,
                                detail.reservation_ids,
                                outcome.correlation_id,
                            )
                            .await?;
                    }
                    WorkflowStep::ScheduleFulfillment => {
                        let tracking_number =
                            detail
                                .tracking_number
                                .ok_or(OrchestratorError::MalformedOutcome {
                                    workflow_id: outcome.workflow_id,
                                    step: outcome.step,
                                    missing: "tracking number",
                                })?;
                        self.orders
                            .schedule_fulfillment(order_id, tracking_number, outcome.correlation_id)
                            .await?;
                    }
                    WorkflowStep::Notify => {
                        self.orders
                            .record_notification(
                                order_id,
                                "email".to_string(),
                                outcome.correlation_id,
                            )
                            .await?;
                    }
                    WorkflowStep::Validate => {}
                }

                metrics::counter!("orchestrator_steps_completed_total").increment(1);

                if workflow.state() == WorkflowState::Completed {
                    self.record_completion(&workflow);
                } else if workflow.current_step().is_some() {
                    self.dispatch_current_step(&mut workflow, 1).await?;
                }
            }
            StepResult::Failure(failure) => {
                let events = workflow.fail_step(
                    outcome.step,
                    outcome.correlation_id,
                    failure.reason.clone(),
                )?;
                let version = self
                    .append_workflow(
                        outcome.workflow_id,
                        workflow.version(),
                        &events,
                        outcome.correlation_id,
                    )
                    .await?;
                workflow.apply_events(events);
                workflow.set_version(version);

                metrics::counter!("orchestrator_steps_failed_total").increment(1);
                tracing::warn!(reason = %failure.reason, "step failed");

                match outcome.step {
                    WorkflowStep::ChargePayment => {
                        self.orders
                            .record_payment_failure(
                                order_id,
                                failure.reason,
                                outcome.correlation_id,
                            )
                            .await?;
                    }
                    WorkflowStep::ReserveInventory => {
                        self.orders
                            .record_inventory_unavailable(
                                order_id,
                                failure.unavailable_skus,
                                outcome.correlation_id,
                            )
                            .await?;
                    }
                    _ => {}
                }

                match workflow.state() {
                    WorkflowState::Compensating => {
                        self.run_compensation(outcome.workflow_id).await?;
                    }
                    // A failed NOTIFY still completes the workflow.
                    WorkflowState::Completed => self.record_completion(&workflow),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Cancels an order, compensating its workflow if one is in flight.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, %correlation_id))]
    pub async fn handle_cancel_order(
        &self,
        cmd: CancelOrder,
        correlation_id: CorrelationId,
    ) -> Result<()> {
        let order_id = cmd.order_id;
        self.ensure_leader(order_id).await?;

        match self.idempotency.admit(correlation_id).await? {
            Admission::Admitted => {}
            Admission::AlreadyProcessed(record) => {
                if record.result_ref.is_some() {
                    return Ok(());
                }
                return Err(OrchestratorError::CommandInFlight(correlation_id));
            }
        }

        let active = match self.find_workflow_for_order(order_id).await? {
            Some(workflow_id) => {
                let workflow = self.load_workflow(workflow_id).await?;
                match workflow.state() {
                    WorkflowState::Running => {
                        let events = workflow.force_compensation(cmd.reason.clone())?;
                        self.append_workflow(
                            workflow_id,
                            workflow.version(),
                            &events,
                            correlation_id,
                        )
                        .await?;
                        self.run_compensation(workflow_id).await?;
                        true
                    }
                    // Already unwinding; the cancel is a no-op.
                    WorkflowState::Compensating => true,
                    _ => false,
                }
            }
            None => false,
        };

        if !active {
            // No live workflow; the order state machine decides whether a
            // direct cancellation is still legal.
            self.orders.cancel_order(cmd, correlation_id).await?;
        }

        self.idempotency
            .record_result(correlation_id, serde_json::json!({ "cancelled": true }))
            .await?;

        metrics::counter!("orchestrator_orders_cancelled_total").increment(1);
        Ok(())
    }

    /// Loads a workflow by ID, or None if it has never been started.
    pub async fn get_workflow(&self, workflow_id: AggregateId) -> Result<Option<WorkflowInstance>> {
        let workflow = self.fold_workflow(workflow_id).await?;
        Ok(workflow.id().map(|_| workflow))
    }

    /// Finds the workflow driving an order, if one was ever started.
    pub async fn find_workflow_for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Option<AggregateId>> {
        let query = EventQuery::for_aggregate_type(WorkflowInstance::aggregate_type())
            .event_type("WorkflowStarted");
        let envelopes = self.store.query_events(query).await?;

        for envelope in envelopes {
            let started = envelope
                .payload
                .get("data")
                .and_then(|d| d.get("order_id"))
                .and_then(|v| serde_json::from_value::<AggregateId>(v.clone()).ok());
            if started == Some(order_id) {
                return Ok(Some(envelope.aggregate_id));
            }
        }
        Ok(None)
    }

    /// Re-drives every overdue workflow this node owns.
    ///
    /// A stuck step inside its retry budget is re-dispatched with a fresh
    /// correlation ID, which supersedes the original: a late answer to the
    /// first dispatch is now stale and will be shed. Past the budget the
    /// workflow is forced into compensation.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> Result<u32> {
        let query = EventQuery::for_aggregate_type(WorkflowInstance::aggregate_type())
            .event_type("WorkflowStarted");
        let envelopes = self.store.query_events(query).await?;

        let mut swept = 0;
        for envelope in envelopes {
            let workflow_id = envelope.aggregate_id;
            let mut workflow = self.fold_workflow(workflow_id).await?;
            let Some(order_id) = workflow.order_id() else {
                continue;
            };
            if !workflow.is_overdue(now) {
                continue;
            }
            if !self.node.is_leader_for(order_id).await? {
                continue;
            }

            if workflow.state() == WorkflowState::Running {
                if self.retry.is_exhausted(workflow.attempt()) {
                    tracing::warn!(
                        %workflow_id,
                        attempt = workflow.attempt(),
                        "step retries exhausted, compensating"
                    );
                    let events = workflow.force_compensation("step timed out")?;
                    self.append_workflow(
                        workflow_id,
                        workflow.version(),
                        &events,
                        CorrelationId::new(),
                    )
                    .await?;
                    metrics::counter!("orchestrator_step_timeouts_total").increment(1);
                    self.run_compensation(workflow_id).await?;
                } else {
                    let attempt = workflow.attempt() + 1;
                    tracing::info!(%workflow_id, attempt, "re-dispatching overdue step");
                    metrics::counter!("orchestrator_step_timeouts_total").increment(1);
                    self.dispatch_current_step(&mut workflow, attempt).await?;
                }
                swept += 1;
            } else if workflow.state() == WorkflowState::Compensating {
                // A node died mid-unwind; pick the compensation back up.
                self.run_compensation(workflow_id).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Appends a StepDispatched event and hands the command to the
    /// dispatcher.
    async fn dispatch_current_step(
        &self,
        workflow: &mut WorkflowInstance,
        attempt: u32,
    ) -> Result<()> {
        let workflow_id = workflow.id().ok_or_else(not_started)?;
        let order_id = workflow
            .order_id()
            .ok_or(OrchestratorError::WorkflowNotFound(workflow_id))?;
        let Some(step) = workflow.current_step() else {
            return Ok(());
        };

        let correlation_id = self.fresh_dispatch_correlation().await?;
        let deadline = Utc::now() + self.step_deadline();

        let events = vec![WorkflowEvent::step_dispatched(
            step,
            correlation_id,
            attempt,
            deadline,
        )];
        let version = self
            .append_workflow(workflow_id, workflow.version(), &events, correlation_id)
            .await?;
        workflow.apply_events(events);
        workflow.set_version(version);

        let command = match step {
            WorkflowStep::ChargePayment => {
                let order = self.load_order(order_id).await?;
                StepCommand::ChargePayment {
                    workflow_id,
                    order_id,
                    amount: order.total_amount(),
                    correlation_id,
                }
            }
            WorkflowStep::ReserveInventory => {
                let order = self.load_order(order_id).await?;
                StepCommand::ReserveInventory {
                    workflow_id,
                    order_id,
                    items: order.items().to_vec(),
                    correlation_id,
                }
            }
            WorkflowStep::ScheduleFulfillment => StepCommand::ScheduleFulfillment {
                workflow_id,
                order_id,
                correlation_id,
            },
            WorkflowStep::Notify => StepCommand::Notify {
                workflow_id,
                order_id,
                event_type: "ORDER_CONFIRMED".to_string(),
                correlation_id,
            },
            WorkflowStep::Validate => {
                return Err(OrchestratorError::InvalidState {
                    expected: "a dispatchable step".to_string(),
                    actual: step.to_string(),
                });
            }
        };

        self.dispatcher.dispatch(command).await
    }

    /// Works the pending compensation list until it is drained, retrying
    /// each action per the retry policy.
    ///
    /// When every action is applied the order is closed as cancelled and
    /// the workflow marked failed. When an action exhausts its retries it
    /// is dead-lettered and the workflow marked failed with the order left
    /// as-is for an operator.
    async fn run_compensation(&self, workflow_id: AggregateId) -> Result<()> {
        loop {
            let workflow = self.load_workflow(workflow_id).await?;
            if workflow.state() != WorkflowState::Compensating {
                return Ok(());
            }
            let order_id = workflow
                .order_id()
                .ok_or(OrchestratorError::WorkflowNotFound(workflow_id))?;

            let Some(action) = workflow.next_pending_compensation() else {
                let reason = workflow
                    .failure_reason()
                    .unwrap_or("compensated")
                    .to_string();
                let correlation_id = CorrelationId::new();
                self.orders
                    .close_compensated(order_id, reason.clone(), correlation_id)
                    .await?;
                let events = vec![WorkflowEvent::workflow_failed(reason)];
                self.append_workflow(workflow_id, workflow.version(), &events, correlation_id)
                    .await?;
                metrics::counter!("orchestrator_workflows_failed_total").increment(1);
                tracing::info!(%workflow_id, "compensation complete, order cancelled");
                return Ok(());
            };
            let step = action.step;

            let command = self.compensation_command(&workflow, step).await?;
            let mut attempt = 1;
            loop {
                let correlation_id = self.fresh_dispatch_correlation().await?;
                let mut command = command.clone();
                set_compensation_correlation(&mut command, correlation_id);

                match self.dispatcher.compensate(command).await {
                    Ok(()) => {
                        let events = vec![WorkflowEvent::compensation_applied(
                            step, attempt,
                        )];
                        self.append_workflow(
                            workflow_id,
                            workflow.version(),
                            &events,
                            correlation_id,
                        )
                        .await?;
                        self.orders
                            .apply_compensation(
                                order_id,
                                step.as_str().to_string(),
                                correlation_id,
                            )
                            .await?;
                        metrics::counter!("orchestrator_compensations_applied_total")
                            .increment(1);
                        break;
                    }
                    Err(e) if self.retry.is_exhausted(attempt) => {
                        tracing::error!(
                            %workflow_id,
                            %step,
                            attempt,
                            error = %e,
                            "compensation retries exhausted"
                        );
                        let events = vec![
                            WorkflowEvent::compensation_failed(
                                step,
                                attempt,
                                e.to_string(),
                            ),
                            WorkflowEvent::workflow_failed(format!(
                                "compensation of {step} failed: {e}"
                            )),
                        ];
                        self.append_workflow(
                            workflow_id,
                            workflow.version(),
                            &events,
                            correlation_id,
                        )
                        .await?;
                        self.dead_letters
                            .record(DeadLetterRecord {
                                workflow_id,
                                order_id,
                                step,
                                reason: e.to_string(),
                                attempts: attempt,
                                recorded_at: Utc::now(),
                            })
                            .await?;
                        metrics::counter!("orchestrator_compensations_dead_lettered_total")
                            .increment(1);
                        metrics::counter!("orchestrator_workflows_failed_total").increment(1);
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(%step, attempt, error = %e, "compensation attempt failed");
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        attempt += 1;
                    }
                }
            }
        }
    }

    /// Builds the undo command for a step from the workflow's gathered
    /// context. The context is guaranteed present because compensations
    /// are only scheduled for steps that completed.
    async fn compensation_command(
        &self,
        workflow: &WorkflowInstance,
        step: WorkflowStep,
    ) -> Result<CompensationCommand> {
        let workflow_id = workflow.id().ok_or_else(not_started)?;
        let order_id = workflow
            .order_id()
            .ok_or(OrchestratorError::WorkflowNotFound(workflow_id))?;
        let missing = |what: &str| OrchestratorError::InvalidState {
            expected: format!("{what} recorded for compensation"),
            actual: "missing".to_string(),
        };

        match step {
            WorkflowStep::ChargePayment => {
                let order = self.load_order(order_id).await?;
                Ok(CompensationCommand::RefundPayment {
                    workflow_id,
                    order_id,
                    payment_id: workflow
                        .payment_id()
                        .ok_or_else(|| missing("payment ID"))?
                        .to_string(),
                    amount: order.total_amount(),
                    correlation_id: CorrelationId::new(),
                })
            }
            WorkflowStep::ReserveInventory => Ok(CompensationCommand::ReleaseInventory {
                workflow_id,
                order_id,
                reservation_ids: workflow.reservation_ids().to_vec(),
                correlation_id: CorrelationId::new(),
            }),
            WorkflowStep::ScheduleFulfillment => Ok(CompensationCommand::CancelFulfillment {
                workflow_id,
                order_id,
                tracking_number: workflow
                    .tracking_number()
                    .ok_or_else(|| missing("tracking number"))?
                    .to_string(),
                correlation_id: CorrelationId::new(),
            }),
            WorkflowStep::Validate | WorkflowStep::Notify => Err(OrchestratorError::InvalidState {
                expected: "a compensatable step".to_string(),
                actual: step.to_string(),
            }),
        }
    }

    async fn ensure_leader(&self, order_id: AggregateId) -> Result<()> {
        if self.node.is_leader_for(order_id).await? {
            return Ok(());
        }
        let partition = self.node.router().partition_for(order_id);
        let key = self.node.router().partition_key(partition);
        let current_leader = self.node.coordinator().current_owner(&key).await?;
        Err(OrchestratorError::NotLeader {
            order_id,
            current_leader,
        })
    }

    /// Mints and admits the correlation ID for a dispatch or compensation
    /// attempt. Admission here gives downstream executors a uniqueness
    /// guarantee per attempt.
    async fn fresh_dispatch_correlation(&self) -> Result<CorrelationId> {
        let correlation_id = CorrelationId::new();
        match self.idempotency.admit(correlation_id).await? {
            Admission::Admitted => Ok(correlation_id),
            Admission::AlreadyProcessed(_) => {
                Err(OrchestratorError::CommandInFlight(correlation_id))
            }
        }
    }

    async fn load_order(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(OrchestratorError::OrderNotFound(order_id))
    }

    async fn fold_workflow(&self, workflow_id: AggregateId) -> Result<WorkflowInstance> {
        let envelopes = self.store.get_events_for_aggregate(workflow_id).await?;
        let mut workflow = WorkflowInstance::default();
        for envelope in envelopes {
            let event: WorkflowEvent = serde_json::from_value(envelope.payload)?;
            workflow.apply(event);
            workflow.set_version(envelope.version);
        }
        Ok(workflow)
    }

    async fn load_workflow(&self, workflow_id: AggregateId) -> Result<WorkflowInstance> {
        let workflow = self.fold_workflow(workflow_id).await?;
        if workflow.id().is_none() {
            return Err(OrchestratorError::WorkflowNotFound(workflow_id));
        }
        Ok(workflow)
    }

    async fn append_workflow(
        &self,
        workflow_id: AggregateId,
        current_version: Version,
        events: &[WorkflowEvent],
        correlation_id: CorrelationId,
    ) -> Result<Version> {
        let mut new_events = Vec::with_capacity(events.len());
        for event in events {
            new_events.push(
                NewEvent::builder()
                    .event_type(event.event_type())
                    .correlation_id(correlation_id)
                    .payload(event)?
                    .build(),
            );
        }

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };

        Ok(self
            .store
            .append(
                workflow_id,
                WorkflowInstance::aggregate_type(),
                new_events,
                options,
            )
            .await?)
    }

    fn record_completion(&self, workflow: &WorkflowInstance) {
        if let Some(started_at) = workflow.started_at() {
            let duration = (Utc::now() - started_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            metrics::histogram!("orchestrator_workflow_duration_seconds")
                .record(duration.as_secs_f64());
        }
        metrics::counter!("orchestrator_workflows_completed_total").increment(1);
        tracing::info!("workflow completed");
    }

    fn step_deadline(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.step_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

fn not_started() -> OrchestratorError {
    OrchestratorError::InvalidState {
        expected: "started".to_string(),
        actual: WorkflowState::NotStarted.to_string(),
    }
}

fn set_compensation_correlation(command: &mut CompensationCommand, id: CorrelationId) {
    match command {
        CompensationCommand::RefundPayment { correlation_id, .. }
        | CompensationCommand::ReleaseInventory { correlation_id, .. }
        | CompensationCommand::CancelFulfillment { correlation_id, .. } => {
            *correlation_id = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{RecordingDispatcher, StepDetail};
    use cluster::{InMemoryIdempotencyTracker, InMemoryLeaseCoordinator, PartitionRouter};
    use domain::{CustomerId, Money, OrderItem};
    use event_store::InMemoryEventStore;

    type TestOrchestrator = Orchestrator<
        InMemoryEventStore,
        RecordingDispatcher,
        InMemoryIdempotencyTracker,
        InMemoryLeaseCoordinator,
    >;

    async fn leader_orchestrator() -> (TestOrchestrator, RecordingDispatcher) {
        let store = InMemoryEventStore::new();
        let dispatcher = RecordingDispatcher::new();
        let node = ClusterNode::new(
            "node-test",
            PartitionRouter::new(1),
            InMemoryLeaseCoordinator::default(),
        );
        node.acquire_partitions().await.unwrap();
        let orchestrator = Orchestrator::new(
            store,
            dispatcher.clone(),
            InMemoryIdempotencyTracker::new(),
            node,
        )
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)));
        (orchestrator, dispatcher)
    }

    fn sample_items() -> Vec<OrderItem> {
        vec![
            OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
            OrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(500)),
        ]
    }

    fn success_outcome(
        workflow_id: AggregateId,
        command: &StepCommand,
        detail: StepDetail,
    ) -> StepOutcome {
        StepOutcome::success(workflow_id, command.step(), command.correlation_id(), detail)
    }

    #[tokio::test]
    async fn create_order_starts_workflow_and_dispatches_charge() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;

        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Running);
        assert_eq!(workflow.order_id(), Some(order_id));
        assert_eq!(workflow.completed_steps(), &[WorkflowStep::Validate]);
        assert_eq!(workflow.current_step(), Some(WorkflowStep::ChargePayment));
        assert!(workflow.pending_correlation().is_some());

        let command = dispatcher.last_dispatch().unwrap();
        assert_eq!(command.step(), WorkflowStep::ChargePayment);
        assert_eq!(
            command.correlation_id(),
            workflow.pending_correlation().unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_create_returns_recorded_workflow() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let correlation_id = CorrelationId::new();

        let first = orchestrator
            .handle_create_order(cmd.clone(), correlation_id)
            .await
            .unwrap();
        let second = orchestrator
            .handle_create_order(cmd, correlation_id)
            .await
            .unwrap();

        assert_eq!(first, second);
        // Only the original request dispatched anything.
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn failed_create_releases_admission_for_retry() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let correlation_id = CorrelationId::new();

        let bad = CreateOrder::for_customer(CustomerId::new(), vec![]);
        let result = orchestrator.handle_create_order(bad, correlation_id).await;
        assert!(matches!(result, Err(OrchestratorError::Domain(_))));

        // The admission was given back: the same correlation ID retried
        // with a valid command proceeds instead of seeing CommandInFlight.
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        orchestrator
            .handle_create_order(cmd, correlation_id)
            .await
            .unwrap();
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn non_leader_rejects_commands() {
        let store = InMemoryEventStore::new();
        let node = ClusterNode::new(
            "node-test",
            PartitionRouter::new(1),
            InMemoryLeaseCoordinator::default(),
        );
        // No partitions acquired.
        let orchestrator = Orchestrator::new(
            store,
            RecordingDispatcher::new(),
            InMemoryIdempotencyTracker::new(),
            node,
        );

        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let result = orchestrator.handle_create_order(cmd, CorrelationId::new()).await;
        assert!(matches!(result, Err(OrchestratorError::NotLeader { .. })));
    }

    #[tokio::test]
    async fn happy_path_runs_the_whole_pipeline() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        assert_eq!(command.step(), WorkflowStep::ReserveInventory);
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    reservation_ids: vec!["RES-1".to_string(), "RES-2".to_string()],
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        assert_eq!(command.step(), WorkflowStep::ScheduleFulfillment);
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    tracking_number: Some("TRACK-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        assert_eq!(command.step(), WorkflowStep::Notify);
        orchestrator
            .on_step_result(success_outcome(workflow_id, &command, StepDetail::default()))
            .await
            .unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Completed);
        assert_eq!(workflow.payment_id(), Some("PAY-1"));
        assert_eq!(workflow.tracking_number(), Some("TRACK-1"));

        let order = orchestrator.orders().get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.payment_id(), Some("PAY-1"));
        assert_eq!(order.reservation_ids(), &["RES-1", "RES-2"]);
    }

    #[tokio::test]
    async fn inventory_failure_refunds_and_cancels() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        let mut outcome = StepOutcome::failure(
            workflow_id,
            command.step(),
            command.correlation_id(),
            "OUT_OF_STOCK: SKU-002",
        );
        if let StepResult::Failure(ref mut failure) = outcome.result {
            failure.unavailable_skus = vec![domain::Sku::new("SKU-002")];
        }
        orchestrator.on_step_result(outcome).await.unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Failed);

        // The only completed compensatable step was the charge.
        let compensated = dispatcher.compensated();
        assert_eq!(compensated.len(), 1);
        assert_eq!(compensated[0].step(), WorkflowStep::ChargePayment);

        let order = orchestrator.orders().get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.compensated_steps(), &["CHARGE_PAYMENT".to_string()]);
    }

    #[tokio::test]
    async fn stale_outcome_is_rejected() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        let result = orchestrator
            .on_step_result(StepOutcome::success(
                workflow_id,
                command.step(),
                CorrelationId::new(),
                StepDetail::default(),
            ))
            .await;

        assert!(matches!(result, Err(OrchestratorError::StaleOutcome { .. })));
    }

    #[tokio::test]
    async fn payment_success_without_payment_id_is_rejected() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        let result = orchestrator
            .on_step_result(success_outcome(workflow_id, &command, StepDetail::default()))
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::MalformedOutcome {
                missing: "payment ID",
                ..
            })
        ));

        // Nothing was recorded; a well-formed redelivery still lands.
        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.current_step(), Some(WorkflowStep::ChargePayment));
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_outcome_is_rejected() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        let outcome = success_outcome(
            workflow_id,
            &command,
            StepDetail {
                payment_id: Some("PAY-1".to_string()),
                ..StepDetail::default()
            },
        );
        orchestrator.on_step_result(outcome.clone()).await.unwrap();

        let result = orchestrator.on_step_result(outcome).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::OutOfOrderOutcome { .. })
        ));
    }

    #[tokio::test]
    async fn notify_failure_still_completes() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        for detail in [
            StepDetail {
                payment_id: Some("PAY-1".to_string()),
                ..StepDetail::default()
            },
            StepDetail {
                reservation_ids: vec!["RES-1".to_string()],
                ..StepDetail::default()
            },
            StepDetail {
                tracking_number: Some("TRACK-1".to_string()),
                ..StepDetail::default()
            },
        ] {
            let command = dispatcher.last_dispatch().unwrap();
            orchestrator
                .on_step_result(success_outcome(workflow_id, &command, detail))
                .await
                .unwrap();
        }

        let command = dispatcher.last_dispatch().unwrap();
        assert_eq!(command.step(), WorkflowStep::Notify);
        orchestrator
            .on_step_result(StepOutcome::failure(
                workflow_id,
                command.step(),
                command.correlation_id(),
                "smtp down",
            ))
            .await
            .unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Completed);
        assert!(dispatcher.compensated().is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_flight_compensates() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        orchestrator
            .handle_cancel_order(
                CancelOrder::new(order_id, "customer changed mind", None),
                CorrelationId::new(),
            )
            .await
            .unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert_eq!(dispatcher.compensated().len(), 1);

        let order = orchestrator.orders().get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn exhausted_compensation_is_dead_lettered() {
        let store = InMemoryEventStore::new();
        let dispatcher = RecordingDispatcher::new();
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let node = ClusterNode::new(
            "node-test",
            PartitionRouter::new(1),
            InMemoryLeaseCoordinator::default(),
        );
        node.acquire_partitions().await.unwrap();
        let orchestrator = Orchestrator::new(
            store,
            dispatcher.clone(),
            InMemoryIdempotencyTracker::new(),
            node,
        )
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)))
        .with_dead_letter_store(dead_letters.clone());

        dispatcher.set_fail_compensation(WorkflowStep::ChargePayment);

        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(StepOutcome::failure(
                workflow_id,
                command.step(),
                command.correlation_id(),
                "OUT_OF_STOCK: SKU-002",
            ))
            .await
            .unwrap();

        let workflow = orchestrator.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert_eq!(dead_letters.count(), 1);
        assert_eq!(dead_letters.records()[0].step, WorkflowStep::ChargePayment);

        // The order is left for an operator, not auto-cancelled.
        let order = orchestrator.orders().get_order(order_id).await.unwrap().unwrap();
        assert_ne!(order.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let (orchestrator, _) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let order_id = cmd.order_id;
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let result = orchestrator.start(order_id).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::AlreadyStarted(id)) if id == workflow_id
        ));
    }

    #[tokio::test]
    async fn crash_recovery_refolds_mid_flight_state() {
        let (orchestrator, dispatcher) = leader_orchestrator().await;
        let cmd = CreateOrder::for_customer(CustomerId::new(), sample_items());
        let workflow_id = orchestrator
            .handle_create_order(cmd, CorrelationId::new())
            .await
            .unwrap();

        let command = dispatcher.last_dispatch().unwrap();
        orchestrator
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    payment_id: Some("PAY-1".to_string()),
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        // A second orchestrator over the same store sees the same state
        // and accepts the pending outcome.
        let node = ClusterNode::new(
            "node-test",
            orchestrator.node().router().clone(),
            InMemoryLeaseCoordinator::default(),
        );
        node.acquire_partitions().await.unwrap();
        let replacement = Orchestrator::new(
            orchestrator.store.clone(),
            dispatcher.clone(),
            InMemoryIdempotencyTracker::new(),
            node,
        );

        let workflow = replacement.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.current_step(), Some(WorkflowStep::ReserveInventory));
        assert_eq!(workflow.payment_id(), Some("PAY-1"));

        let command = dispatcher.last_dispatch().unwrap();
        replacement
            .on_step_result(success_outcome(
                workflow_id,
                &command,
                StepDetail {
                    reservation_ids: vec!["RES-1".to_string()],
                    ..StepDetail::default()
                },
            ))
            .await
            .unwrap();

        let workflow = replacement.get_workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(
            workflow.current_step(),
            Some(WorkflowStep::ScheduleFulfillment)
        );
    }
}
