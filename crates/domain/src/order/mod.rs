//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::{AddItem, CancelOrder, CreateOrder, MarkDelivered, RemoveItem};
pub use events::{
    CompensationAppliedData, FulfillmentScheduledData, InventoryReservedData,
    InventoryUnavailableData, ItemAddedData, ItemRemovedData, NotificationSentData,
    OrderCancelledData, OrderCreatedData, OrderDeliveredData, OrderEvent, PaymentConfirmedData,
    PaymentFailedData,
};
pub use service::OrderService;
pub use state::OrderStatus;
pub use value_objects::{CustomerId, Money, OrderItem, Sku};

use thiserror::Error;

/// Errors that can occur during order operations.
///
/// These are business rule violations: rejected immediately, never retried.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The requested status change is not in the transition table.
    #[error("Invalid transition: cannot {action} from {current} status")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// Direct cancellation was requested past the point of no return.
    /// Once preparation has started, cancellation must go through
    /// compensation because external resources may already be committed.
    #[error("Order in {current} status can only be cancelled through compensation")]
    CancellationRequiresCompensation { current: OrderStatus },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {sku}: {quantity} (must be greater than 0)")]
    InvalidQuantity { sku: String, quantity: u32 },

    /// No line item with the given SKU.
    #[error("No line item with SKU {sku}")]
    ItemNotFound { sku: String },

    /// The declared total does not match the sum of line items.
    #[error("Total amount mismatch: declared {declared}, items sum to {computed}")]
    TotalMismatch { declared: Money, computed: Money },

    /// Order is already created.
    #[error("Order already created")]
    AlreadyCreated,

    /// Command addressed to an order that was never created.
    #[error("Order does not exist")]
    NotCreated,
}
