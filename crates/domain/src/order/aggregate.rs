//! Order aggregate implementation.

use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    CustomerId, Money, OrderError, OrderEvent, OrderItem, OrderStatus, Sku,
    events::OrderCreatedData,
};

/// Order aggregate root.
///
/// Represents an order in the system with its full lifecycle from creation
/// through payment, reservation and fulfillment to delivery or cancellation.
/// Line items can be added and removed while the order is Pending; payment
/// freezes them, and everything after that is lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: Option<AggregateId>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    /// Customer who placed the order.
    customer_id: Option<CustomerId>,

    /// Current status of the order.
    status: OrderStatus,

    /// Line items, editable until payment is confirmed.
    items: Vec<OrderItem>,

    /// Total amount of the order.
    total_amount: Money,

    /// Payment reference, set once payment is confirmed.
    payment_id: Option<String>,

    /// Inventory reservation references.
    reservation_ids: Vec<String>,

    /// Shipment tracking number, set once fulfillment is scheduled.
    tracking_number: Option<String>,

    /// Saga steps that have been compensated against this order.
    compensated_steps: Vec<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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
            OrderEvent::OrderCreated(data) => self.apply_order_created(data),
            OrderEvent::ItemAdded(data) => {
                if let Some(existing) = self.items.iter_mut().find(|i| i.sku == data.item.sku) {
                    existing.quantity += data.item.quantity;
                } else {
                    self.items.push(data.item);
                }
                self.total_amount = data.new_total;
            }
            OrderEvent::ItemRemoved(data) => {
                self.items.retain(|i| i.sku != data.sku);
                self.total_amount = data.new_total;
            }
            OrderEvent::PaymentConfirmed(data) => {
                self.payment_id = Some(data.payment_id);
                self.status = OrderStatus::Paid;
            }
            OrderEvent::PaymentFailed(_) => {
                // Order stays Pending; the saga decides what happens next.
            }
            OrderEvent::InventoryReserved(data) => {
                self.reservation_ids = data.reservation_ids;
                self.status = OrderStatus::Preparing;
            }
            OrderEvent::InventoryUnavailable(_) => {
                // Order stays Paid; compensation will unwind the payment.
            }
            OrderEvent::FulfillmentScheduled(data) => {
                self.tracking_number = Some(data.tracking_number);
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::NotificationSent(_) => {}
            OrderEvent::OrderDelivered(_) => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::CompensationApplied(data) => {
                self.compensated_steps.push(data.step);
            }
        }
    }
}

// Query methods
impl Order {
    /// Returns the customer ID.
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the line items.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns an item by SKU.
    pub fn get_item(&self, sku: &Sku) -> Option<&OrderItem> {
        self.items.iter().find(|item| &item.sku == sku)
    }

    /// Returns the total amount.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Returns the payment reference, if payment has been confirmed.
    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    /// Returns the inventory reservation references.
    pub fn reservation_ids(&self) -> &[String] {
        &self.reservation_ids
    }

    /// Returns the tracking number, if fulfillment has been scheduled.
    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    /// Returns the saga steps compensated against this order.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn require_created(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotCreated);
        }
        Ok(())
    }

    fn require_transition(
        &self,
        target: OrderStatus,
        action: &'static str,
    ) -> Result<(), OrderError> {
        if !self.status.can_transition(target) {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action,
            });
        }
        Ok(())
    }
}

// Command methods (return events)
impl Order {
    /// Creates a new order with its items and a declared total.
    ///
    /// The declared total must match the sum of line item totals exactly.
    pub fn create(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }

        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    sku: item.sku.to_string(),
                    quantity: item.quantity,
                });
            }
        }

        let computed: Money = items.iter().map(OrderItem::total_price).sum();
        if computed != total_amount {
            return Err(OrderError::TotalMismatch {
                declared: total_amount,
                computed,
            });
        }

        Ok(vec![OrderEvent::order_created(
            order_id,
            customer_id,
            items,
            total_amount,
        )])
    }

    /// Adds a line item. Only legal while the order is Pending.
    ///
    /// Adding a SKU already on the order increases its quantity.
    pub fn add_item(&self, item: OrderItem) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "add item",
            });
        }

        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                sku: item.sku.to_string(),
                quantity: item.quantity,
            });
        }

        let new_total: Money = self
            .items
            .iter()
            .map(OrderItem::total_price)
            .sum::<Money>()
            + item.total_price();
        Ok(vec![OrderEvent::item_added(&item, new_total)])
    }

    /// Removes a line item by SKU. Only legal while the order is Pending.
    ///
    /// The last remaining item cannot be removed; cancel the order instead.
    pub fn remove_item(&self, sku: &Sku) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "remove item",
            });
        }

        let existing = self.get_item(sku).ok_or_else(|| OrderError::ItemNotFound {
            sku: sku.to_string(),
        })?;
        if self.items.len() == 1 {
            return Err(OrderError::NoItems);
        }

        let new_total = self
            .items
            .iter()
            .filter(|i| &i.sku != sku)
            .map(OrderItem::total_price)
            .sum();
        Ok(vec![OrderEvent::item_removed(existing.sku.clone(), new_total)])
    }

    /// Records a successful payment charge.
    pub fn confirm_payment(
        &self,
        payment_id: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        self.require_transition(OrderStatus::Paid, "confirm payment")?;

        Ok(vec![OrderEvent::payment_confirmed(
            payment_id,
            self.total_amount,
        )])
    }

    /// Records a failed payment attempt. The order stays Pending.
    pub fn record_payment_failure(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "record payment failure",
            });
        }

        Ok(vec![OrderEvent::payment_failed(reason)])
    }

    /// Records that inventory was reserved for every line item.
    pub fn mark_reserved(
        &self,
        reservation_ids: Vec<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        self.require_transition(OrderStatus::Preparing, "mark reserved")?;

        Ok(vec![OrderEvent::inventory_reserved(reservation_ids)])
    }

    /// Records an inventory shortage. The order stays Paid.
    pub fn record_inventory_unavailable(
        &self,
        unavailable_skus: Vec<Sku>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        if self.status != OrderStatus::Paid {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "record inventory shortage",
            });
        }

        Ok(vec![OrderEvent::inventory_unavailable(unavailable_skus)])
    }

    /// Schedules fulfillment and marks the order shipped.
    pub fn schedule_fulfillment(
        &self,
        tracking_number: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        self.require_transition(OrderStatus::Shipped, "schedule fulfillment")?;

        Ok(vec![OrderEvent::fulfillment_scheduled(tracking_number)])
    }

    /// Records that a customer notification was sent.
    pub fn record_notification(
        &self,
        channel: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        if self.status.is_terminal() && self.status != OrderStatus::Delivered {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "record notification",
            });
        }

        Ok(vec![OrderEvent::notification_sent(channel)])
    }

    /// Marks the order as received by the customer.
    pub fn mark_delivered(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;
        self.require_transition(OrderStatus::Delivered, "mark delivered")?;

        Ok(vec![OrderEvent::order_delivered()])
    }

    /// Cancels the order directly.
    ///
    /// Only accepted while Pending or Paid. Past that point external
    /// resources are committed and cancellation must run as compensation.
    pub fn cancel(
        &self,
        reason: impl Into<String>,
        cancelled_by: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;

        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "cancel",
            });
        }

        if !self.status.can_cancel_directly() {
            return Err(OrderError::CancellationRequiresCompensation {
                current: self.status,
            });
        }

        Ok(vec![OrderEvent::order_cancelled(reason, cancelled_by)])
    }

    /// Records that a saga step was compensated against this order.
    pub fn apply_compensation(
        &self,
        step: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;

        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "apply compensation",
            });
        }

        Ok(vec![OrderEvent::compensation_applied(step, self.status)])
    }

    /// Closes the order as cancelled after compensation has completed.
    ///
    /// Unlike [`Order::cancel`] this is accepted from any non-terminal
    /// status, since compensation has already unwound the side effects.
    pub fn close_compensated(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_created()?;

        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "close compensated",
            });
        }

        Ok(vec![OrderEvent::order_cancelled(
            reason,
            Some("saga".to_string()),
        )])
    }
}

// Apply event helpers
impl Order {
    fn apply_order_created(&mut self, data: OrderCreatedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.status = OrderStatus::Pending;
    }
}
