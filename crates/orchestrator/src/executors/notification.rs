//! Notification executor trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};

use crate::error::OrchestratorError;

/// Trait for customer notification delivery.
///
/// Notification is fire-and-forget: a delivery failure never triggers
/// compensation of earlier steps.
#[async_trait]
pub trait NotificationExecutor: Send + Sync {
    /// Notifies the customer about an order event.
    async fn notify(
        &self,
        order_id: AggregateId,
        event_type: &str,
        correlation_id: CorrelationId,
    ) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<(AggregateId, String)>,
    fail_on_notify: bool,
}

/// In-memory notification executor for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationExecutor {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationExecutor {
    /// Creates a new in-memory notification executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the executor to fail deliveries.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state.write().unwrap().fail_on_notify = fail;
    }

    /// Returns the number of notifications delivered.
    pub fn notification_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns the notifications delivered for one order.
    pub fn notifications_for(&self, order_id: AggregateId) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(_, event_type)| event_type.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationExecutor for InMemoryNotificationExecutor {
    async fn notify(
        &self,
        order_id: AggregateId,
        event_type: &str,
        _correlation_id: CorrelationId,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_notify {
            return Err(OrchestratorError::NotificationExecutor(
                "Delivery failed".to_string(),
            ));
        }

        state.sent.push((order_id, event_type.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_records_delivery() {
        let executor = InMemoryNotificationExecutor::new();
        let order_id = AggregateId::new();

        executor
            .notify(order_id, "ORDER_CONFIRMED", CorrelationId::new())
            .await
            .unwrap();

        assert_eq!(executor.notification_count(), 1);
        assert_eq!(
            executor.notifications_for(order_id),
            vec!["ORDER_CONFIRMED".to_string()]
        );
    }

    #[tokio::test]
    async fn fail_on_notify() {
        let executor = InMemoryNotificationExecutor::new();
        executor.set_fail_on_notify(true);

        let result = executor
            .notify(AggregateId::new(), "ORDER_CONFIRMED", CorrelationId::new())
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::NotificationExecutor(_))
        ));
        assert_eq!(executor.notification_count(), 0);
    }
}
