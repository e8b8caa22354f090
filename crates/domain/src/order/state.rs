//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Transition table:
/// ```text
/// Pending ──┬──► Paid ──► Preparing ──► Shipped ──► Delivered
///           │      │          │
///           └──────┴──────────┴──► Cancelled
/// ```
///
/// Delivered and Cancelled are terminal. Cancellation out of Preparing is
/// only reachable through saga compensation, never by a direct command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order created, payment not yet confirmed.
    #[default]
    Pending,

    /// Payment confirmed, inventory not yet reserved.
    Paid,

    /// Inventory reserved, order being prepared for shipment.
    Preparing,

    /// Fulfillment scheduled, order on its way.
    Shipped,

    /// Order received by the customer (terminal state).
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if `target` is a legal transition from this status.
    pub fn can_transition(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Paid, Preparing)
                | (Paid, Cancelled)
                | (Preparing, Shipped)
                | (Preparing, Cancelled)
                | (Shipped, Delivered)
        )
    }

    /// Returns true if a direct cancel command is accepted in this status.
    ///
    /// Once preparation starts, external resources are committed and
    /// cancellation must run through compensation instead.
    pub fn can_cancel_directly(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Returns true if this is a terminal status (no outgoing transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
