//! Audit log read model — every event, grouped by correlation id.
//!
//! This view taps the full event feed rather than a single aggregate type,
//! so an operator can pull up everything a command touched (order events
//! and workflow events alike) from one correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use event_store::{EventEnvelope, EventId, Version};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// One audited event occurrence.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_id: EventId,
    pub correlation_id: CorrelationId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

struct AuditLogState {
    by_correlation: HashMap<CorrelationId, Vec<AuditEntry>>,
    total_entries: usize,
    position: ProjectionPosition,
}

/// Read model view recording the audit trail of every correlation id.
#[derive(Clone)]
pub struct AuditLogView {
    state: Arc<RwLock<AuditLogState>>,
}

impl AuditLogView {
    /// Creates a new empty audit log view.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AuditLogState {
                by_correlation: HashMap::new(),
                total_entries: 0,
                position: ProjectionPosition::zero(),
            })),
        }
    }

    /// Gets the audit trail for a correlation id, oldest entry first.
    pub async fn entries_for(&self, correlation_id: CorrelationId) -> Vec<AuditEntry> {
        self.state
            .read()
            .await
            .by_correlation
            .get(&correlation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of distinct correlation ids seen.
    pub async fn correlation_count(&self) -> usize {
        self.state.read().await.by_correlation.len()
    }

    /// Returns the total number of audited events.
    pub async fn total_entries(&self) -> usize {
        self.state.read().await.total_entries
    }
}

impl Default for AuditLogView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for AuditLogView {
    fn name(&self) -> &'static str {
        "AuditLogView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let entry = AuditEntry {
            event_id: event.event_id,
            correlation_id: event.correlation_id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            version: event.version,
            timestamp: event.timestamp,
        };

        let mut state = self.state.write().await;
        state
            .by_correlation
            .entry(event.correlation_id)
            .or_default()
            .push(entry);
        state.total_entries += 1;
        state.position = state.position.advance();

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.by_correlation.clear();
        state.total_entries = 0;
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for AuditLogView {
    fn name(&self) -> &'static str {
        "AuditLogView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|g| g.total_entries).unwrap_or(0)
    }
}
