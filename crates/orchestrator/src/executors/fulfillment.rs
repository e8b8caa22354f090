//! Fulfillment executor trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};

use crate::error::OrchestratorError;

/// Result of a successfully scheduled fulfillment.
#[derive(Debug, Clone)]
pub struct FulfillmentTicket {
    /// Tracking number assigned by the fulfillment provider.
    pub tracking_number: String,
}

/// Trait for fulfillment scheduling operations.
#[async_trait]
pub trait FulfillmentExecutor: Send + Sync {
    /// Books the order with the fulfillment provider.
    async fn schedule(
        &self,
        order_id: AggregateId,
        correlation_id: CorrelationId,
    ) -> Result<FulfillmentTicket, OrchestratorError>;

    /// Cancels a previously scheduled fulfillment.
    async fn cancel(&self, tracking_number: &str) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryFulfillmentState {
    shipments: HashMap<String, AggregateId>,
    next_id: u32,
    fail_on_schedule: bool,
}

/// In-memory fulfillment executor for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFulfillmentExecutor {
    state: Arc<RwLock<InMemoryFulfillmentState>>,
}

impl InMemoryFulfillmentExecutor {
    /// Creates a new in-memory fulfillment executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the executor to fail scheduling.
    pub fn set_fail_on_schedule(&self, fail: bool) {
        self.state.write().unwrap().fail_on_schedule = fail;
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    /// Returns true if a shipment exists with the given tracking number.
    pub fn has_shipment(&self, tracking_number: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .shipments
            .contains_key(tracking_number)
    }
}

#[async_trait]
impl FulfillmentExecutor for InMemoryFulfillmentExecutor {
    async fn schedule(
        &self,
        order_id: AggregateId,
        _correlation_id: CorrelationId,
    ) -> Result<FulfillmentTicket, OrchestratorError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_schedule {
            return Err(OrchestratorError::FulfillmentExecutor(
                "No carrier capacity".to_string(),
            ));
        }

        state.next_id += 1;
        let tracking_number = format!("TRACK-{:04}", state.next_id);
        state.shipments.insert(tracking_number.clone(), order_id);

        Ok(FulfillmentTicket { tracking_number })
    }

    async fn cancel(&self, tracking_number: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.shipments.remove(tracking_number);
        Ok(())
    }
}
