//! Read models and projections for the order query side.
//!
//! This crate provides the query side of the system:
//! - [`Projection`] trait for processing events into read models
//! - [`ReadModel`] trait for query access to denormalized data
//! - [`ProjectionProcessor`] for catch-up replay and live tailing of the store
//! - Three read model views: current orders, order history, audit log

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{AuditEntry, AuditLogView, CurrentOrdersView, OrderHistoryView};
