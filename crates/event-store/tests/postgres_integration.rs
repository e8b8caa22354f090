//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendOptions, CorrelationId, EventQuery, EventStore, EventStoreError,
    EventStoreExt, NewEvent, PostgresEventStore, Version,
};
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

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    // Create a fresh pool for each test to avoid connection issues
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn make_event(event_type: &str) -> NewEvent {
    NewEvent::builder()
        .event_type(event_type)
        .correlation_id(CorrelationId::new())
        .payload_raw(serde_json::json!({"test": true}))
        .build()
}

fn make_correlated_event(event_type: &str, correlation_id: CorrelationId) -> NewEvent {
    NewEvent::builder()
        .event_type(event_type)
        .correlation_id(correlation_id)
        .payload_raw(serde_json::json!({"test": true}))
        .build()
}

#[tokio::test]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let result = store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("TestEvent")],
            AppendOptions::expect_new(),
        )
        .await;
    assert_eq!(result.unwrap(), Version::first());

    let events = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "TestEvent");
    assert_eq!(events[0].version, Version::first());
    assert_eq!(events[0].aggregate_type, "TestAggregate");
}

#[tokio::test]
async fn append_assigns_gapless_versions() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        make_event("Event1"),
        make_event("Event2"),
        make_event("Event3"),
    ];

    let version = store
        .append(
            aggregate_id,
            "TestAggregate",
            events,
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(3));

    let stored = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].version, Version::new(1));
    assert_eq!(stored[1].version, Version::new(2));
    assert_eq!(stored[2].version, Version::new(3));
}

#[tokio::test]
async fn optimistic_concurrency_conflict() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    // A writer that believes the aggregate is still new must fail.
    let result = store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event2")],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
async fn optimistic_concurrency_success() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event2")],
            AppendOptions::expect_version(Version::first()),
        )
        .await;
    assert!(result.is_ok());

    let version = store.get_aggregate_version(aggregate_id).await.unwrap();
    assert_eq!(version, Some(Version::new(2)));
}

#[tokio::test]
async fn unconditional_append_never_conflicts() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    let version = store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event2")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(version, Version::new(2));
}

#[tokio::test]
async fn get_events_from_version() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![
                make_event("Event1"),
                make_event("Event2"),
                make_event("Event3"),
            ],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let from_v2 = store
        .get_events_for_aggregate_from_version(aggregate_id, Version::new(2))
        .await
        .unwrap();

    assert_eq!(from_v2.len(), 2);
    assert_eq!(from_v2[0].version, Version::new(2));
    assert_eq!(from_v2[1].version, Version::new(3));
}

#[tokio::test]
async fn query_events_by_correlation_id() {
    let store = get_test_store().await;
    let id1 = AggregateId::new();
    let id2 = AggregateId::new();
    let correlation_id = CorrelationId::new();

    store
        .append(
            id1,
            "TestAggregate",
            vec![make_correlated_event("Event1", correlation_id)],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    store
        .append(
            id2,
            "TestAggregate",
            vec![make_correlated_event("Event2", correlation_id)],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    store
        .append(
            id1,
            "TestAggregate",
            vec![make_event("Event3")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let results = store
        .query_events(EventQuery::for_correlation(correlation_id))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|e| e.correlation_id == correlation_id));
}

#[tokio::test]
async fn query_events_with_filters() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![
                make_event("Event1"),
                make_event("Event2"),
                make_event("Event3"),
            ],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let query = EventQuery::new()
        .aggregate_id(aggregate_id)
        .from_version(Version::new(2))
        .to_version(Version::new(2));

    let results = store.query_events(query).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].version, Version::new(2));
}

#[tokio::test]
async fn query_events_with_limit_and_offset() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = (1..=5).map(|i| make_event(&format!("Event{i}"))).collect();
    store
        .append(aggregate_id, "TestAggregate", events, AppendOptions::new())
        .await
        .unwrap();

    let query = EventQuery::new()
        .aggregate_id(aggregate_id)
        .limit(2)
        .offset(1);

    let results = store.query_events(query).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].version, Version::new(2));
    assert_eq!(results[1].version, Version::new(3));
}

#[tokio::test]
async fn query_events_by_aggregate_type() {
    let store = get_test_store().await;

    store
        .append(
            AggregateId::new(),
            "Order",
            vec![make_event("OrderCreated")],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    store
        .append(
            AggregateId::new(),
            "OrderWorkflow",
            vec![make_event("WorkflowStarted")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let results = store
        .query_events(EventQuery::for_aggregate_type("OrderWorkflow"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].aggregate_type, "OrderWorkflow");
}

#[tokio::test]
async fn stream_all_events() {
    use futures_util::StreamExt;

    let store = get_test_store().await;

    store
        .append(
            AggregateId::new(),
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    store
        .append(
            AggregateId::new(),
            "TestAggregate",
            vec![make_event("Event2")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let stream = store.stream_all_events().await.unwrap();
    let events: Vec<_> = stream.collect().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.is_ok()));
}

#[tokio::test]
async fn aggregate_exists_extension() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    assert!(!store.aggregate_exists(aggregate_id).await.unwrap());

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    assert!(store.aggregate_exists(aggregate_id).await.unwrap());
}

#[tokio::test]
async fn subscribers_observe_committed_events() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let mut rx = store.subscribe();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![make_event("Event1")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.aggregate_id, aggregate_id);
    assert_eq!(envelope.event_type, "Event1");
}

#[tokio::test]
async fn empty_append_is_rejected() {
    let store = get_test_store().await;

    let result = store
        .append(
            AggregateId::new(),
            "TestAggregate",
            vec![],
            AppendOptions::new(),
        )
        .await;

    assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
}

#[tokio::test]
async fn event_metadata_preserved() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let event = NewEvent::builder()
        .event_type("TestEvent")
        .correlation_id(CorrelationId::new())
        .payload_raw(serde_json::json!({"data": "test"}))
        .metadata("causation_id", serde_json::json!("cause-456"))
        .metadata("node", serde_json::json!("node-a"))
        .build();

    store
        .append(
            aggregate_id,
            "TestAggregate",
            vec![event],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let events = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 1);

    let retrieved = &events[0];
    assert_eq!(
        retrieved.metadata.get("causation_id"),
        Some(&serde_json::json!("cause-456"))
    );
    assert_eq!(
        retrieved.metadata.get("node"),
        Some(&serde_json::json!("node-a"))
    );
}
