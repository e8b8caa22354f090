//! Dead-letter records for compensations that could not be applied.
//!
//! When every retry of a compensating action fails, the workflow is
//! closed as failed and the action is parked here for an operator.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::step::WorkflowStep;

/// A compensating action that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Workflow the action belongs to.
    pub workflow_id: AggregateId,
    /// Order the workflow was executing.
    pub order_id: AggregateId,
    /// Step whose compensation failed.
    pub step: WorkflowStep,
    /// Last failure reason.
    pub reason: String,
    /// Number of attempts made before giving up.
    pub attempts: u32,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Sink for compensations that need manual intervention.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Records a failed compensation.
    async fn record(&self, record: DeadLetterRecord) -> Result<()>;
}

/// In-memory dead-letter store for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterStore {
    records: Arc<RwLock<Vec<DeadLetterRecord>>>,
}

impl InMemoryDeadLetterStore {
    /// Creates a new in-memory dead-letter store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record written so far.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.read().unwrap().clone()
    }

    /// Returns the number of records.
    pub fn count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn record(&self, record: DeadLetterRecord) -> Result<()> {
        tracing::error!(
            workflow_id = %record.workflow_id,
            step = %record.step,
            attempts = record.attempts,
            reason = %record.reason,
            "compensation dead-lettered"
        );
        self.records.write().unwrap().push(record);
        Ok(())
    }
}
