//! Order history read model — delivered and cancelled orders.

use std::collections::{HashMap, HashSet};
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

/// Summary of a delivered or cancelled order.
#[derive(Debug, Clone)]
pub struct OrderHistorySummary {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub item_count: usize,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub tracking_number: Option<String>,
    pub compensated_steps: Vec<String>,
}

/// Staging data for an order that has not yet reached a terminal status.
#[derive(Debug, Clone)]
struct StagingOrder {
    customer_id: CustomerId,
    skus: HashSet<Sku>,
    total_amount: Money,
    created_at: DateTime<Utc>,
    tracking_number: Option<String>,
    compensated_steps: Vec<String>,
}

struct OrderHistoryState {
    staging: HashMap<AggregateId, StagingOrder>,
    history: HashMap<AggregateId, OrderHistorySummary>,
    position: ProjectionPosition,
}

/// Read model view for finished orders.
///
/// Orders are staged while in flight and moved to history when they
/// reach a terminal status (Delivered or Cancelled).
#[derive(Clone)]
pub struct OrderHistoryView {
    state: Arc<RwLock<OrderHistoryState>>,
}

impl OrderHistoryView {
    /// Creates a new empty order history view.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(OrderHistoryState {
                staging: HashMap::new(),
                history: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    /// Gets a specific historical order.
    pub async fn get_order(&self, order_id: AggregateId) -> Option<OrderHistorySummary> {
        self.state.read().await.history.get(&order_id).cloned()
    }

    /// Gets all historical orders.
    pub async fn get_all_history(&self) -> Vec<OrderHistorySummary> {
        self.state.read().await.history.values().cloned().collect()
    }

    /// Gets all delivered orders.
    pub async fn get_delivered_orders(&self) -> Vec<OrderHistorySummary> {
        self.state
            .read()
            .await
            .history
            .values()
            .filter(|o| o.status == OrderStatus::Delivered)
            .cloned()
            .collect()
    }

    /// Gets all cancelled orders.
    pub async fn get_cancelled_orders(&self) -> Vec<OrderHistorySummary> {
        self.state
            .read()
            .await
            .history
            .values()
            .filter(|o| o.status == OrderStatus::Cancelled)
            .cloned()
            .collect()
    }

    /// Gets historical orders for a specific customer.
    pub async fn get_history_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Vec<OrderHistorySummary> {
        self.state
            .read()
            .await
            .history
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect()
    }
}

impl Default for OrderHistoryView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for OrderHistoryView {
    fn name(&self) -> &'static str {
        "OrderHistoryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;

        if event.aggregate_type != "Order" {
            state.position = state.position.advance();
            return Ok(());
        }

        let order_event: OrderEvent = serde_json::from_value(event.payload.clone())?;
        let order_id = event.aggregate_id;

        match order_event {
            OrderEvent::OrderCreated(data) => {
                state.staging.insert(
                    order_id,
                    StagingOrder {
                        customer_id: data.customer_id,
                        skus: data.items.iter().map(|i| i.sku.clone()).collect(),
                        total_amount: data.total_amount,
                        created_at: data.created_at,
                        tracking_number: None,
                        compensated_steps: Vec::new(),
                    },
                );
            }
            OrderEvent::ItemAdded(data) => {
                if let Some(staged) = state.staging.get_mut(&order_id) {
                    staged.skus.insert(data.item.sku);
                    staged.total_amount = data.new_total;
                }
            }
            OrderEvent::ItemRemoved(data) => {
                if let Some(staged) = state.staging.get_mut(&order_id) {
                    staged.skus.remove(&data.sku);
                    staged.total_amount = data.new_total;
                }
            }
            OrderEvent::FulfillmentScheduled(data) => {
                if let Some(staged) = state.staging.get_mut(&order_id) {
                    staged.tracking_number = Some(data.tracking_number);
                }
            }
            OrderEvent::CompensationApplied(data) => {
                if let Some(staged) = state.staging.get_mut(&order_id) {
                    staged.compensated_steps.push(data.step);
                }
            }
            OrderEvent::OrderDelivered(data) => {
                if let Some(staged) = state.staging.remove(&order_id) {
                    state.history.insert(
                        order_id,
                        OrderHistorySummary {
                            order_id,
                            customer_id: staged.customer_id,
                            status: OrderStatus::Delivered,
                            item_count: staged.skus.len(),
                            total_amount: staged.total_amount,
                            created_at: staged.created_at,
                            delivered_at: Some(data.delivered_at),
                            cancelled_at: None,
                            cancellation_reason: None,
                            cancelled_by: None,
                            tracking_number: staged.tracking_number,
                            compensated_steps: staged.compensated_steps,
                        },
                    );
                }
            }
            OrderEvent::OrderCancelled(data) => {
                if let Some(staged) = state.staging.remove(&order_id) {
                    state.history.insert(
                        order_id,
                        OrderHistorySummary {
                            order_id,
                            customer_id: staged.customer_id,
                            status: OrderStatus::Cancelled,
                            item_count: staged.skus.len(),
                            total_amount: staged.total_amount,
                            created_at: staged.created_at,
                            delivered_at: None,
                            cancelled_at: Some(data.cancelled_at),
                            cancellation_reason: Some(data.reason),
                            cancelled_by: data.cancelled_by,
                            tracking_number: staged.tracking_number,
                            compensated_steps: staged.compensated_steps,
                        },
                    );
                }
            }
            // Intermediate pipeline events carry nothing this view keeps.
            OrderEvent::PaymentConfirmed(_)
            | OrderEvent::PaymentFailed(_)
            | OrderEvent::InventoryReserved(_)
            | OrderEvent::InventoryUnavailable(_)
            | OrderEvent::NotificationSent(_) => {}
        }

        state.position = state.position.advance();

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.staging.clear();
        state.history.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for OrderHistoryView {
    fn name(&self) -> &'static str {
        "OrderHistoryView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|g| g.history.len()).unwrap_or(0)
    }
}
