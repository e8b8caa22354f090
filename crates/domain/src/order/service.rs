//! Order service providing a simplified API for order operations.

use common::{AggregateId, CorrelationId};
use event_store::{EventEnvelope, EventStore, Version};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{AddItem, CancelOrder, CreateOrder, MarkDelivered, Order, RemoveItem, Sku};

impl From<super::OrderError> for DomainError {
    fn from(e: super::OrderError) -> Self {
        DomainError::Order(e)
    }
}

/// Service for managing orders.
///
/// Wraps the command handler and exposes one method per order operation.
/// Every mutation takes a correlation ID so that retried requests and
/// saga-issued commands can be traced back through the event log.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Creates a new order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CreateOrder {
            order_id,
            customer_id,
            items,
            total_amount,
        } = cmd;

        self.handler
            .execute(order_id, correlation_id, |order| {
                order.create(order_id, customer_id, items.clone(), total_amount)
            })
            .await
    }

    /// Adds a line item to a pending order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn add_item(
        &self,
        cmd: AddItem,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let AddItem { order_id, item } = cmd;

        self.handler
            .execute(order_id, correlation_id, |order| {
                order.add_item(item.clone())
            })
            .await
    }

    /// Removes a line item from a pending order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn remove_item(
        &self,
        cmd: RemoveItem,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let RemoveItem { order_id, sku } = cmd;

        self.handler
            .execute(order_id, correlation_id, |order| order.remove_item(&sku))
            .await
    }

    /// Cancels an order directly (only valid before preparation starts).
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CancelOrder {
            order_id,
            reason,
            cancelled_by,
        } = cmd;

        self.handler
            .execute(order_id, correlation_id, |order| {
                order.cancel(reason.clone(), cancelled_by.clone())
            })
            .await
    }

    /// Marks an order as delivered.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn mark_delivered(
        &self,
        cmd: MarkDelivered,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, correlation_id, |order| order.mark_delivered())
            .await
    }

    /// Records a successful payment charge.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: AggregateId,
        payment_id: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.confirm_payment(payment_id.clone())
            })
            .await
    }

    /// Records a failed payment attempt.
    #[tracing::instrument(skip(self))]
    pub async fn record_payment_failure(
        &self,
        order_id: AggregateId,
        reason: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.record_payment_failure(reason.clone())
            })
            .await
    }

    /// Records that inventory was reserved for the order.
    #[tracing::instrument(skip(self, reservation_ids))]
    pub async fn mark_reserved(
        &self,
        order_id: AggregateId,
        reservation_ids: Vec<String>,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.mark_reserved(reservation_ids.clone())
            })
            .await
    }

    /// Records an inventory shortage.
    #[tracing::instrument(skip(self, unavailable_skus))]
    pub async fn record_inventory_unavailable(
        &self,
        order_id: AggregateId,
        unavailable_skus: Vec<Sku>,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.record_inventory_unavailable(unavailable_skus.clone())
            })
            .await
    }

    /// Schedules fulfillment for the order.
    #[tracing::instrument(skip(self))]
    pub async fn schedule_fulfillment(
        &self,
        order_id: AggregateId,
        tracking_number: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.schedule_fulfillment(tracking_number.clone())
            })
            .await
    }

    /// Records that a customer notification was sent.
    #[tracing::instrument(skip(self))]
    pub async fn record_notification(
        &self,
        order_id: AggregateId,
        channel: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.record_notification(channel.clone())
            })
            .await
    }

    /// Records that a saga step was compensated against the order.
    #[tracing::instrument(skip(self))]
    pub async fn apply_compensation(
        &self,
        order_id: AggregateId,
        step: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.apply_compensation(step.clone())
            })
            .await
    }

    /// Closes an order as cancelled after compensation has completed.
    #[tracing::instrument(skip(self))]
    pub async fn close_compensated(
        &self,
        order_id: AggregateId,
        reason: String,
        correlation_id: CorrelationId,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, correlation_id, |order| {
                order.close_compensated(reason.clone())
            })
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Returns the full ordered event history for an order.
    #[tracing::instrument(skip(self))]
    pub async fn get_history(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self
            .handler
            .store()
            .get_events_for_aggregate(order_id)
            .await?)
    }

    /// Rebuilds an order as it stood at a past version.
    ///
    /// Replays the stream from the beginning, stopping after `up_to`.
    /// Returns None for an unknown order.
    #[tracing::instrument(skip(self))]
    pub async fn replay_order(
        &self,
        order_id: AggregateId,
        up_to: Version,
    ) -> Result<Option<Order>, DomainError> {
        let envelopes = self
            .handler
            .store()
            .get_events_for_aggregate(order_id)
            .await?;
        if envelopes.is_empty() {
            return Ok(None);
        }

        let mut order = Order::default();
        for envelope in envelopes {
            if envelope.version > up_to {
                break;
            }
            let event = serde_json::from_value(envelope.payload)?;
            order.apply(event);
            order.set_version(envelope.version);
        }

        Ok(Some(order))
    }
}
