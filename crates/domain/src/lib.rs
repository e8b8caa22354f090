//! Domain layer for the order saga system.
//!
//! This crate provides the core domain abstractions:
//! - `Aggregate` and `DomainEvent` traits for event-sourced entities
//! - `CommandHandler` with optimistic-concurrency conflict retry
//! - The `Order` aggregate and its status state machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    AddItem, CancelOrder, CreateOrder, CustomerId, MarkDelivered, Money, Order, OrderError,
    OrderEvent, OrderItem, OrderService, OrderStatus, RemoveItem, Sku,
};
