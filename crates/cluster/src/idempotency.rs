//! Cluster-wide idempotency tracking.
//!
//! Every inbound command carries a correlation ID. Before any work happens,
//! the tracker is asked to admit the ID: the first caller wins and proceeds,
//! later callers with the same ID get back the recorded outcome instead of
//! re-running side effects. Records expire after a TTL so the tracked set
//! stays bounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// How long an idempotency record is retained before it may be purged.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A tracked correlation ID with its retention window and recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The correlation ID this record tracks.
    pub correlation_id: CorrelationId,

    /// When the ID was first admitted.
    pub first_seen_at: DateTime<Utc>,

    /// When the record becomes eligible for purging.
    pub expires_at: DateTime<Utc>,

    /// Reference to the outcome of the original request, if recorded.
    pub result_ref: Option<serde_json::Value>,
}

impl IdempotencyRecord {
    /// Creates a fresh record for a newly admitted correlation ID.
    pub fn new(correlation_id: CorrelationId, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            first_seen_at: now,
            expires_at: now + ttl,
            result_ref: None,
        }
    }

    /// Returns true if the record has passed its retention window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of asking the tracker to admit a correlation ID.
#[derive(Debug, Clone)]
pub enum Admission {
    /// First time this ID has been seen; the caller should proceed.
    Admitted,

    /// The ID was already processed; the original record is returned so the
    /// caller can surface the recorded outcome instead of re-executing.
    AlreadyProcessed(IdempotencyRecord),
}

impl Admission {
    /// Returns true if the caller was admitted to proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Cluster-wide check-and-set over correlation IDs.
///
/// Admission must be atomic across all nodes: when two nodes race on the
/// same ID, exactly one sees `Admitted`.
#[async_trait]
pub trait IdempotencyTracker: Send + Sync {
    /// Atomically admits a correlation ID, or returns the existing record.
    async fn admit(&self, correlation_id: CorrelationId) -> Result<Admission>;

    /// Records the outcome of a processed request against its ID.
    async fn record_result(
        &self,
        correlation_id: CorrelationId,
        result_ref: serde_json::Value,
    ) -> Result<()>;

    /// Drops the record for a correlation ID so the ID may be admitted
    /// again. Called when an admitted request fails before producing a
    /// result; otherwise retries would be blocked until the TTL expires.
    async fn release(&self, correlation_id: CorrelationId) -> Result<()>;

    /// Looks up the record for a correlation ID, if one exists.
    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<IdempotencyRecord>>;

    /// Removes expired records and returns how many were purged.
    async fn purge_expired(&self) -> Result<u64>;
}

/// In-memory idempotency tracker for tests and single-node setups.
///
/// Not suitable for multi-node deployments: admission is only atomic
/// within this process.
#[derive(Clone)]
pub struct InMemoryIdempotencyTracker {
    records: Arc<RwLock<HashMap<CorrelationId, IdempotencyRecord>>>,
    ttl: Duration,
}

impl InMemoryIdempotencyTracker {
    /// Creates a tracker with the default 24 hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_IDEMPOTENCY_TTL)
    }

    /// Creates a tracker with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns the number of live records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no records are tracked.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryIdempotencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyTracker for InMemoryIdempotencyTracker {
    async fn admit(&self, correlation_id: CorrelationId) -> Result<Admission> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        if let Some(existing) = records.get(&correlation_id) {
            if !existing.is_expired(now) {
                tracing::debug!(%correlation_id, "duplicate correlation id rejected");
                return Ok(Admission::AlreadyProcessed(existing.clone()));
            }
            // Expired record; the ID may be reused.
        }

        records.insert(
            correlation_id,
            IdempotencyRecord::new(correlation_id, self.ttl),
        );
        Ok(Admission::Admitted)
    }

    async fn record_result(
        &self,
        correlation_id: CorrelationId,
        result_ref: serde_json::Value,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&correlation_id) {
            record.result_ref = Some(result_ref);
        }
        Ok(())
    }

    async fn release(&self, correlation_id: CorrelationId) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(&correlation_id);
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<IdempotencyRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&correlation_id).cloned())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}
