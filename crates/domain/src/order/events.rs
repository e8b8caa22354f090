//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CustomerId, Money, OrderItem, OrderStatus, Sku};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created with its items and declared total.
    OrderCreated(OrderCreatedData),

    /// A line item was added while the order was still pending.
    ItemAdded(ItemAddedData),

    /// A line item was removed while the order was still pending.
    ItemRemoved(ItemRemovedData),

    /// Payment was charged successfully.
    PaymentConfirmed(PaymentConfirmedData),

    /// Payment attempt failed.
    PaymentFailed(PaymentFailedData),

    /// Inventory was reserved for every line item.
    InventoryReserved(InventoryReservedData),

    /// One or more line items could not be reserved.
    InventoryUnavailable(InventoryUnavailableData),

    /// Fulfillment was scheduled and the order shipped.
    FulfillmentScheduled(FulfillmentScheduledData),

    /// Customer notification was sent.
    NotificationSent(NotificationSentData),

    /// Order was received by the customer.
    OrderDelivered(OrderDeliveredData),

    /// Order was cancelled.
    OrderCancelled(OrderCancelledData),

    /// A saga compensation action was applied against this order.
    CompensationApplied(CompensationAppliedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::ItemAdded(_) => "ItemAdded",
            OrderEvent::ItemRemoved(_) => "ItemRemoved",
            OrderEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            OrderEvent::PaymentFailed(_) => "PaymentFailed",
            OrderEvent::InventoryReserved(_) => "InventoryReserved",
            OrderEvent::InventoryUnavailable(_) => "InventoryUnavailable",
            OrderEvent::FulfillmentScheduled(_) => "FulfillmentScheduled",
            OrderEvent::NotificationSent(_) => "NotificationSent",
            OrderEvent::OrderDelivered(_) => "OrderDelivered",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::CompensationApplied(_) => "CompensationApplied",
        }
    }
}

/// Data for OrderCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    /// The unique order ID.
    pub order_id: AggregateId,

    /// The customer who placed the order.
    pub customer_id: CustomerId,

    /// Line items at creation time.
    pub items: Vec<OrderItem>,

    /// Total amount declared by the caller, validated against the items.
    pub total_amount: Money,

    /// When the order was created.
    pub created_at: DateTime<Utc>,
}

/// Data for ItemAdded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAddedData {
    /// The item that was added.
    pub item: OrderItem,

    /// Order total after the addition.
    pub new_total: Money,

    /// When the item was added.
    pub added_at: DateTime<Utc>,
}

/// Data for ItemRemoved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRemovedData {
    /// SKU of the removed item.
    pub sku: Sku,

    /// Order total after the removal.
    pub new_total: Money,

    /// When the item was removed.
    pub removed_at: DateTime<Utc>,
}

/// Data for PaymentConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    /// Payment reference from the payment provider.
    pub payment_id: String,

    /// Amount that was charged.
    pub amount: Money,

    /// When the payment was confirmed.
    pub confirmed_at: DateTime<Utc>,
}

/// Data for PaymentFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    /// Provider error description.
    pub reason: String,

    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Data for InventoryReserved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservedData {
    /// Reservation references, one per line item.
    pub reservation_ids: Vec<String>,

    /// When the inventory was reserved.
    pub reserved_at: DateTime<Utc>,
}

/// Data for InventoryUnavailable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUnavailableData {
    /// SKUs that could not be reserved.
    pub unavailable_skus: Vec<Sku>,

    /// When the shortage was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Data for FulfillmentScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentScheduledData {
    /// Shipment tracking number.
    pub tracking_number: String,

    /// When fulfillment was scheduled.
    pub scheduled_at: DateTime<Utc>,
}

/// Data for NotificationSent event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSentData {
    /// Delivery channel (e.g. "email", "sms").
    pub channel: String,

    /// When the notification was sent.
    pub sent_at: DateTime<Utc>,
}

/// Data for OrderDelivered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    /// When the order was delivered.
    pub delivered_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    /// When the order was cancelled.
    pub cancelled_at: DateTime<Utc>,

    /// Reason for cancellation.
    pub reason: String,

    /// Who cancelled the order.
    pub cancelled_by: Option<String>,
}

/// Data for CompensationApplied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAppliedData {
    /// The saga step that was undone (e.g. "CHARGE_PAYMENT").
    pub step: String,

    /// Status of the order when compensation was applied.
    pub status_at_compensation: OrderStatus,

    /// When the compensation was applied.
    pub applied_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    /// Creates an OrderCreated event.
    pub fn order_created(
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
    ) -> Self {
        OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            customer_id,
            items,
            total_amount,
            created_at: Utc::now(),
        })
    }

    /// Creates an ItemAdded event.
    pub fn item_added(item: &OrderItem, new_total: Money) -> Self {
        OrderEvent::ItemAdded(ItemAddedData {
            item: item.clone(),
            new_total,
            added_at: Utc::now(),
        })
    }

    /// Creates an ItemRemoved event.
    pub fn item_removed(sku: Sku, new_total: Money) -> Self {
        OrderEvent::ItemRemoved(ItemRemovedData {
            sku,
            new_total,
            removed_at: Utc::now(),
        })
    }

    /// Creates a PaymentConfirmed event.
    pub fn payment_confirmed(payment_id: impl Into<String>, amount: Money) -> Self {
        OrderEvent::PaymentConfirmed(PaymentConfirmedData {
            payment_id: payment_id.into(),
            amount,
            confirmed_at: Utc::now(),
        })
    }

    /// Creates a PaymentFailed event.
    pub fn payment_failed(reason: impl Into<String>) -> Self {
        OrderEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    /// Creates an InventoryReserved event.
    pub fn inventory_reserved(reservation_ids: Vec<String>) -> Self {
        OrderEvent::InventoryReserved(InventoryReservedData {
            reservation_ids,
            reserved_at: Utc::now(),
        })
    }

    /// Creates an InventoryUnavailable event.
    pub fn inventory_unavailable(unavailable_skus: Vec<Sku>) -> Self {
        OrderEvent::InventoryUnavailable(InventoryUnavailableData {
            unavailable_skus,
            recorded_at: Utc::now(),
        })
    }

    /// Creates a FulfillmentScheduled event.
    pub fn fulfillment_scheduled(tracking_number: impl Into<String>) -> Self {
        OrderEvent::FulfillmentScheduled(FulfillmentScheduledData {
            tracking_number: tracking_number.into(),
            scheduled_at: Utc::now(),
        })
    }

    /// Creates a NotificationSent event.
    pub fn notification_sent(channel: impl Into<String>) -> Self {
        OrderEvent::NotificationSent(NotificationSentData {
            channel: channel.into(),
            sent_at: Utc::now(),
        })
    }

    /// Creates an OrderDelivered event.
    pub fn order_delivered() -> Self {
        OrderEvent::OrderDelivered(OrderDeliveredData {
            delivered_at: Utc::now(),
        })
    }

    /// Creates an OrderCancelled event.
    pub fn order_cancelled(reason: impl Into<String>, cancelled_by: Option<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            cancelled_at: Utc::now(),
            reason: reason.into(),
            cancelled_by,
        })
    }

    /// Creates a CompensationApplied event.
    pub fn compensation_applied(step: impl Into<String>, status: OrderStatus) -> Self {
        OrderEvent::CompensationApplied(CompensationAppliedData {
            step: step.into(),
            status_at_compensation: status,
            applied_at: Utc::now(),
        })
    }
}
