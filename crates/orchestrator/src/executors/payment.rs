//! Payment executor trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};
use domain::Money;

use crate::error::OrchestratorError;

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    /// The payment ID assigned by the payment provider.
    pub payment_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    /// Charges the customer for an order.
    async fn charge(
        &self,
        order_id: AggregateId,
        amount: Money,
        correlation_id: CorrelationId,
    ) -> Result<PaymentReceipt, OrchestratorError>;

    /// Refunds a previously made charge.
    async fn refund(
        &self,
        order_id: AggregateId,
        payment_id: &str,
        amount: Money,
        correlation_id: CorrelationId,
    ) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (AggregateId, Money)>,
    next_id: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
}

/// In-memory payment executor for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentExecutor {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentExecutor {
    /// Creates a new in-memory payment executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the executor to decline charges.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Configures the executor to reject refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Returns the number of live (unrefunded) payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    /// Returns true if a payment exists with the given ID.
    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.state.read().unwrap().payments.contains_key(payment_id)
    }
}

#[async_trait]
impl PaymentExecutor for InMemoryPaymentExecutor {
    async fn charge(
        &self,
        order_id: AggregateId,
        amount: Money,
        _correlation_id: CorrelationId,
    ) -> Result<PaymentReceipt, OrchestratorError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_charge {
            return Err(OrchestratorError::PaymentExecutor(
                "Payment declined".to_string(),
            ));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(payment_id.clone(), (order_id, amount));

        Ok(PaymentReceipt { payment_id })
    }

    async fn refund(
        &self,
        _order_id: AggregateId,
        payment_id: &str,
        _amount: Money,
        _correlation_id: CorrelationId,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_refund {
            return Err(OrchestratorError::PaymentExecutor(
                "Refund rejected".to_string(),
            ));
        }

        state.payments.remove(payment_id);
        Ok(())
    }
}
