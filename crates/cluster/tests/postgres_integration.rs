//! PostgreSQL integration tests for the idempotency tracker
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p cluster --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use cluster::{Admission, IdempotencyTracker, PostgresIdempotencyTracker};
use common::CorrelationId;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_idempotency_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh tracker with its own pool and a cleared table
async fn get_test_tracker() -> PostgresIdempotencyTracker {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE idempotency_records")
        .execute(&pool)
        .await
        .unwrap();

    PostgresIdempotencyTracker::new(pool)
}

#[tokio::test]
async fn first_admission_wins() {
    let tracker = get_test_tracker().await;
    let id = CorrelationId::new();

    assert!(tracker.admit(id).await.unwrap().is_admitted());
    assert!(!tracker.admit(id).await.unwrap().is_admitted());
}

#[tokio::test]
async fn duplicate_returns_recorded_result() {
    let tracker = get_test_tracker().await;
    let id = CorrelationId::new();

    tracker.admit(id).await.unwrap();
    tracker
        .record_result(id, serde_json::json!({"workflow_id": "abc"}))
        .await
        .unwrap();

    match tracker.admit(id).await.unwrap() {
        Admission::AlreadyProcessed(record) => {
            assert_eq!(
                record.result_ref,
                Some(serde_json::json!({"workflow_id": "abc"}))
            );
        }
        Admission::Admitted => panic!("expected AlreadyProcessed"),
    }
}

#[tokio::test]
async fn released_id_may_be_admitted_again() {
    let tracker = get_test_tracker().await;
    let id = CorrelationId::new();

    assert!(tracker.admit(id).await.unwrap().is_admitted());
    tracker.release(id).await.unwrap();

    assert!(tracker.admit(id).await.unwrap().is_admitted());
    assert!(tracker.get(id).await.unwrap().is_some());
}

#[tokio::test]
async fn expired_records_are_purged() {
    let tracker_info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&tracker_info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE idempotency_records")
        .execute(&pool)
        .await
        .unwrap();

    let tracker = PostgresIdempotencyTracker::with_ttl(pool, Duration::from_secs(0));
    let id = CorrelationId::new();

    tracker.admit(id).await.unwrap();
    let purged = tracker.purge_expired().await.unwrap();
    assert_eq!(purged, 1);
    assert!(tracker.get(id).await.unwrap().is_none());
}
