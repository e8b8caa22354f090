//! Step executor traits and in-memory implementations.
//!
//! Executors are the outbound boundary of the orchestrator: payment
//! gateway, inventory system, fulfillment provider, and notification
//! delivery live behind these contracts. The in-memory implementations
//! exist for tests and local runs.

pub mod fulfillment;
pub mod inventory;
pub mod notification;
pub mod payment;

pub use fulfillment::{FulfillmentExecutor, FulfillmentTicket, InMemoryFulfillmentExecutor};
pub use inventory::{InMemoryInventoryExecutor, InventoryExecutor, Reservation};
pub use notification::{InMemoryNotificationExecutor, NotificationExecutor};
pub use payment::{InMemoryPaymentExecutor, PaymentExecutor, PaymentReceipt};
