//! Read model views for the order query side.

pub mod audit_log;
pub mod current_orders;
pub mod order_history;

pub use audit_log::{AuditEntry, AuditLogView};
pub use current_orders::{CurrentOrderSummary, CurrentOrdersView};
pub use order_history::{OrderHistorySummary, OrderHistoryView};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use chrono::Utc;
    use common::{AggregateId, CorrelationId};
    use domain::{DomainEvent, OrderEvent};
    use event_store::{EventEnvelope, EventId, Version};

    /// Wraps an order event in an envelope the way the store would seal it.
    pub fn order_envelope(
        aggregate_id: AggregateId,
        version: i64,
        event: &OrderEvent,
    ) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            aggregate_id,
            aggregate_type: "Order".to_string(),
            version: Version::new(version),
            correlation_id: CorrelationId::new(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(event).unwrap(),
            metadata: HashMap::new(),
        }
    }
}
