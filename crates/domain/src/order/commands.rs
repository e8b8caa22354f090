//! Order commands.

use common::AggregateId;

use crate::command::Command;

use super::{CustomerId, Money, Order, OrderItem, Sku};

/// Command to create a new order with its line items.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The order ID to create.
    pub order_id: AggregateId,

    /// The customer placing the order.
    pub customer_id: CustomerId,

    /// Line items for the order.
    pub items: Vec<OrderItem>,

    /// Declared total, validated against the item sum.
    pub total_amount: Money,
}

impl CreateOrder {
    /// Creates a new CreateOrder command.
    pub fn new(
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            items,
            total_amount,
        }
    }

    /// Creates a CreateOrder command with a generated order ID and the
    /// total computed from the items.
    pub fn for_customer(customer_id: CustomerId, items: Vec<OrderItem>) -> Self {
        let total_amount = items.iter().map(OrderItem::total_price).sum();
        Self {
            order_id: AggregateId::new(),
            customer_id,
            items,
            total_amount,
        }
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to add a line item to a pending order.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The order to modify.
    pub order_id: AggregateId,

    /// The item to add.
    pub item: OrderItem,
}

impl AddItem {
    /// Creates a new AddItem command.
    pub fn new(order_id: AggregateId, item: OrderItem) -> Self {
        Self { order_id, item }
    }
}

impl Command for AddItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to remove a line item from a pending order.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    /// The order to modify.
    pub order_id: AggregateId,

    /// SKU of the item to remove.
    pub sku: Sku,
}

impl RemoveItem {
    /// Creates a new RemoveItem command.
    pub fn new(order_id: AggregateId, sku: impl Into<Sku>) -> Self {
        Self {
            order_id,
            sku: sku.into(),
        }
    }
}

impl Command for RemoveItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to cancel an order directly.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// The order to cancel.
    pub order_id: AggregateId,

    /// Reason for cancellation.
    pub reason: String,

    /// Who is cancelling the order.
    pub cancelled_by: Option<String>,
}

impl CancelOrder {
    /// Creates a new CancelOrder command.
    pub fn new(
        order_id: AggregateId,
        reason: impl Into<String>,
        cancelled_by: Option<String>,
    ) -> Self {
        Self {
            order_id,
            reason: reason.into(),
            cancelled_by,
        }
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to mark an order as delivered.
#[derive(Debug, Clone)]
pub struct MarkDelivered {
    /// The order that was delivered.
    pub order_id: AggregateId,
}

impl MarkDelivered {
    /// Creates a new MarkDelivered command.
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for MarkDelivered {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_order_command() {
        let order_id = AggregateId::new();
        let customer_id = CustomerId::new();
        let items = vec![OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000))];

        let cmd = CreateOrder::new(order_id, customer_id, items, Money::from_cents(2000));
        assert_eq!(cmd.aggregate_id(), order_id);
        assert_eq!(cmd.customer_id, customer_id);
        assert_eq!(cmd.total_amount.cents(), 2000);
    }

    #[test]
    fn test_create_order_for_customer_computes_total() {
        let customer_id = CustomerId::new();
        let items = vec![
            OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
            OrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(500)),
        ];

        let cmd = CreateOrder::for_customer(customer_id, items);
        assert_eq!(cmd.total_amount.cents(), 2500);
    }

    #[test]
    fn test_add_item_command() {
        let order_id = AggregateId::new();
        let item = OrderItem::new("SKU-003", "Gizmo", 1, Money::from_cents(500));

        let cmd = AddItem::new(order_id, item);
        assert_eq!(cmd.aggregate_id(), order_id);
        assert_eq!(cmd.item.sku.as_str(), "SKU-003");
    }

    #[test]
    fn test_remove_item_command() {
        let order_id = AggregateId::new();

        let cmd = RemoveItem::new(order_id, "SKU-003");
        assert_eq!(cmd.aggregate_id(), order_id);
        assert_eq!(cmd.sku.as_str(), "SKU-003");
    }

    #[test]
    fn test_cancel_order_command() {
        let order_id = AggregateId::new();

        let cmd = CancelOrder::new(
            order_id,
            "Customer request",
            Some("user@example.com".to_string()),
        );
        assert_eq!(cmd.aggregate_id(), order_id);
        assert_eq!(cmd.reason, "Customer request");
        assert_eq!(cmd.cancelled_by, Some("user@example.com".to_string()));
    }

    #[test]
    fn test_mark_delivered_command() {
        let order_id = AggregateId::new();
        let cmd = MarkDelivered::new(order_id);
        assert_eq!(cmd.aggregate_id(), order_id);
    }
}
