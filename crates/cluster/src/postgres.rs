//! Postgres-backed idempotency tracker.
//!
//! Admission is a single atomic statement: an insert that only displaces an
//! existing row when that row has expired. Exactly one node wins the insert
//! for a given correlation ID no matter how many race on it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::idempotency::{
    Admission, DEFAULT_IDEMPOTENCY_TTL, IdempotencyRecord, IdempotencyTracker,
};

/// Idempotency tracker backed by the `idempotency_records` table.
#[derive(Clone)]
pub struct PostgresIdempotencyTracker {
    pool: PgPool,
    ttl: Duration,
}

impl PostgresIdempotencyTracker {
    /// Creates a tracker with the default 24 hour TTL.
    pub fn new(pool: PgPool) -> Self {
        Self::with_ttl(pool, DEFAULT_IDEMPOTENCY_TTL)
    }

    /// Creates a tracker with a custom TTL.
    pub fn with_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

#[async_trait]
impl IdempotencyTracker for PostgresIdempotencyTracker {
    #[tracing::instrument(skip(self))]
    async fn admit(&self, correlation_id: CorrelationId) -> Result<Admission> {
        let now = Utc::now();
        let expires_at = self.expiry_from(now);

        // The insert wins either when the ID is unseen or when the previous
        // record has expired. A conflict without update means a live
        // duplicate.
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (correlation_id, first_seen_at, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (correlation_id) DO UPDATE
                SET first_seen_at = EXCLUDED.first_seen_at,
                    expires_at = EXCLUDED.expires_at,
                    result_ref = NULL
                WHERE idempotency_records.expires_at <= $2
            RETURNING correlation_id
            "#,
        )
        .bind(correlation_id.as_uuid())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(Admission::Admitted);
        }

        tracing::debug!(%correlation_id, "duplicate correlation id rejected");

        match self.get(correlation_id).await? {
            Some(record) => Ok(Admission::AlreadyProcessed(record)),
            // The record was purged between the insert and the read; treat
            // the retry as a fresh request.
            None => self.admit(correlation_id).await,
        }
    }

    async fn record_result(
        &self,
        correlation_id: CorrelationId,
        result_ref: serde_json::Value,
    ) -> Result<()> {
        sqlx::query("UPDATE idempotency_records SET result_ref = $2 WHERE correlation_id = $1")
            .bind(correlation_id.as_uuid())
            .bind(result_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, correlation_id: CorrelationId) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE correlation_id = $1")
            .bind(correlation_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, first_seen_at, expires_at, result_ref
            FROM idempotency_records
            WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| IdempotencyRecord {
            correlation_id: CorrelationId::from(row.get::<Uuid, _>("correlation_id")),
            first_seen_at: row.get("first_seen_at"),
            expires_at: row.get("expires_at"),
            result_ref: row.get("result_ref"),
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, "purged expired idempotency records");
        }
        Ok(purged)
    }
}
