//! Current orders read model — orders that have not yet reached a terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CustomerId, Money, OrderEvent, OrderStatus, Sku};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Summary of an in-flight order.
#[derive(Debug, Clone)]
pub struct CurrentOrderSummary {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub item_count: usize,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_id: Option<String>,
    pub tracking_number: Option<String>,
    /// Quantity per SKU, kept in step with pre-payment item edits.
    pub items: HashMap<Sku, u32>,
}

/// Read model view for orders still moving through the pipeline.
///
/// Orders are removed from this view when they reach a terminal status
/// (Delivered or Cancelled).
#[derive(Clone)]
pub struct CurrentOrdersView {
    orders: Arc<RwLock<HashMap<AggregateId, CurrentOrderSummary>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl CurrentOrdersView {
    /// Creates a new empty current orders view.
    pub fn new() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    /// Gets a summary of a specific order.
    pub async fn get_order(&self, order_id: AggregateId) -> Option<CurrentOrderSummary> {
        self.orders.read().await.get(&order_id).cloned()
    }

    /// Gets all in-flight orders.
    pub async fn get_all_orders(&self) -> Vec<CurrentOrderSummary> {
        self.orders.read().await.values().cloned().collect()
    }

    /// Gets in-flight orders filtered by status.
    pub async fn get_orders_by_status(&self, status: OrderStatus) -> Vec<CurrentOrderSummary> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect()
    }

    /// Gets in-flight orders for a specific customer.
    pub async fn get_orders_by_customer(
        &self,
        customer_id: CustomerId,
    ) -> Vec<CurrentOrderSummary> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect()
    }
}

impl Default for CurrentOrdersView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for CurrentOrdersView {
    fn name(&self) -> &'static str {
        "CurrentOrdersView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type != "Order" {
            let mut pos = self.position.write().await;
            *pos = pos.advance();
            return Ok(());
        }

        let order_event: OrderEvent = serde_json::from_value(event.payload.clone())?;
        let order_id = event.aggregate_id;

        let mut orders = self.orders.write().await;

        match order_event {
            OrderEvent::OrderCreated(data) => {
                let items: HashMap<Sku, u32> = data
                    .items
                    .iter()
                    .map(|item| (item.sku.clone(), item.quantity))
                    .collect();
                orders.insert(
                    order_id,
                    CurrentOrderSummary {
                        order_id,
                        customer_id: data.customer_id,
                        status: OrderStatus::Pending,
                        item_count: items.len(),
                        total_amount: data.total_amount,
                        created_at: data.created_at,
                        updated_at: data.created_at,
                        payment_id: None,
                        tracking_number: None,
                        items,
                    },
                );
            }
            OrderEvent::ItemAdded(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    *order.items.entry(data.item.sku.clone()).or_insert(0) += data.item.quantity;
                    order.item_count = order.items.len();
                    order.total_amount = data.new_total;
                    order.updated_at = data.added_at;
                }
            }
            OrderEvent::ItemRemoved(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.items.remove(&data.sku);
                    order.item_count = order.items.len();
                    order.total_amount = data.new_total;
                    order.updated_at = data.removed_at;
                }
            }
            OrderEvent::PaymentConfirmed(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.status = OrderStatus::Paid;
                    order.payment_id = Some(data.payment_id);
                    order.updated_at = data.confirmed_at;
                }
            }
            OrderEvent::PaymentFailed(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.updated_at = data.failed_at;
                }
            }
            OrderEvent::InventoryReserved(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.status = OrderStatus::Preparing;
                    order.updated_at = data.reserved_at;
                }
            }
            OrderEvent::InventoryUnavailable(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.updated_at = data.recorded_at;
                }
            }
            OrderEvent::FulfillmentScheduled(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.status = OrderStatus::Shipped;
                    order.tracking_number = Some(data.tracking_number);
                    order.updated_at = data.scheduled_at;
                }
            }
            OrderEvent::NotificationSent(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.updated_at = data.sent_at;
                }
            }
            OrderEvent::CompensationApplied(data) => {
                if let Some(order) = orders.get_mut(&order_id) {
                    order.updated_at = data.applied_at;
                }
            }
            OrderEvent::OrderDelivered(_) | OrderEvent::OrderCancelled(_) => {
                orders.remove(&order_id);
            }
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance();

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.orders.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for CurrentOrdersView {
    fn name(&self) -> &'static str {
        "CurrentOrdersView"
    }

    fn count(&self) -> usize {
        // Use try_read to avoid blocking; returns 0 if the lock is held.
        self.orders.try_read().map(|g| g.len()).unwrap_or(0)
    }
}
