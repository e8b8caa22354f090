use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    AggregateId, CorrelationId, EventBus, EventEnvelope, EventId, EventQuery, EventStoreError,
    NewEvent, Result, Version,
    store::{AppendOptions, EventStore, EventStream, check_expected_version, validate_events_for_append},
};

/// PostgreSQL-backed event store implementation.
///
/// One row per event in the `events` table, with a per-aggregate unique
/// `(aggregate_id, version)` constraint as the last line of defense against
/// racing writers and a `global_position` sequence for replay ordering.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    bus: EventBus,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            bus: EventBus::new(),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    const SELECT_COLUMNS: &'static str = "id, event_type, aggregate_id, aggregate_type, version, correlation_id, timestamp, payload, metadata";
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Version> {
        validate_events_for_append(&events)?;

        let mut tx = self.pool.begin().await?;

        // Serialize writers on the same aggregate for the duration of the
        // transaction; the unique (aggregate_id, version) constraint below
        // still catches anything that slips past.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(aggregate_id.as_uuid().to_string())
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let current_version = Version::new(current.unwrap_or(0));

        check_expected_version(aggregate_id, current_version, &options)?;

        let mut version = current_version;
        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            version = version.next();
            let envelope = EventEnvelope::seal(event, aggregate_id, aggregate_type, version);
            let metadata_json = serde_json::to_value(&envelope.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, correlation_id, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(envelope.event_id.as_uuid())
            .bind(&envelope.event_type)
            .bind(envelope.aggregate_id.as_uuid())
            .bind(&envelope.aggregate_type)
            .bind(envelope.version.as_i64())
            .bind(envelope.correlation_id.as_uuid())
            .bind(envelope.timestamp)
            .bind(&envelope.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: options.expected_version.unwrap_or(current_version),
                        actual: envelope.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            committed.push(envelope);
        }

        tx.commit().await?;

        self.bus.publish(&committed);

        Ok(version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE aggregate_id = $1 ORDER BY version ASC",
            Self::SELECT_COLUMNS
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE aggregate_id = $1 AND version >= $2 ORDER BY version ASC",
            Self::SELECT_COLUMNS
        ))
        .bind(aggregate_id.as_uuid())
        .bind(from_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {} FROM events WHERE 1=1", Self::SELECT_COLUMNS);
        let mut param_count = 0;

        // Build dynamic query
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.aggregate_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_type = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.correlation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND correlation_id = ${param_count}"));
        }
        if query.from_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version >= ${param_count}"));
        }
        if query.to_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version <= ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY global_position ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(agg_type) = query.aggregate_type {
            sqlx_query = sqlx_query.bind(agg_type);
        }
        if let Some(event_types) = query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(correlation_id) = query.correlation_id {
            sqlx_query = sqlx_query.bind(correlation_id.as_uuid());
        }
        if let Some(from_version) = query.from_version {
            sqlx_query = sqlx_query.bind(from_version.as_i64());
        }
        if let Some(to_version) = query.to_version {
            sqlx_query = sqlx_query.bind(to_version.as_i64());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, aggregate_type, version, correlation_id, timestamp, payload, metadata
            FROM events
            ORDER BY global_position ASC
            "#,
        )
        .fetch(&self.pool)
            .map(|result| match result {
                Ok(row) => Self::row_to_event(row),
                Err(e) => Err(EventStoreError::Database(e)),
            });

        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }
}
