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
    AppendOptions, EventEnvelope, EventStore, EventStoreError, EventStoreExt, GlobalTxId,
    PostgresEventStore, Snapshot, Version,
};
use serial_test::serial;
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
            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_journal.sql"))
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

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_journal, saga_snapshots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn create_test_event(stream_id: &GlobalTxId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream_id.clone())
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"local_tx_id": format!("ltx-{version}")}))
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    let event = create_test_event(&gtx, 1, "SagaStarted");
    let version = store
        .append(vec![event], AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let events = store.get_events(&gtx).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "SagaStarted");
    assert_eq!(events[0].stream_id, gtx);
    assert_eq!(events[0].payload["local_tx_id"], "ltx-1");
}

#[tokio::test]
#[serial]
async fn append_multiple_events_atomically() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    let events = vec![
        create_test_event(&gtx, 1, "SagaStarted"),
        create_test_event(&gtx, 2, "TxAdded"),
        create_test_event(&gtx, 3, "TxCommitted"),
    ];
    let version = store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::new(3));

    let stored = store.get_events(&gtx).await.unwrap();
    let versions: Vec<i64> = stored.iter().map(|e| e.version.as_i64()).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
#[serial]
async fn optimistic_concurrency_conflict() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    store
        .append(
            vec![create_test_event(&gtx, 1, "SagaStarted")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append(
            vec![create_test_event(&gtx, 2, "TxAdded")],
            AppendOptions::expect_version(Version::initial()),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[serial]
async fn duplicate_version_maps_to_conflict() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    store
        .append(
            vec![create_test_event(&gtx, 1, "SagaStarted")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let result = store
        .append(
            vec![create_test_event(&gtx, 1, "SagaStarted")],
            AppendOptions::new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[serial]
async fn get_events_from_version() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    let events = (1..=4)
        .map(|v| create_test_event(&gtx, v, "TxAdded"))
        .collect();
    store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();

    let tail = store
        .get_events_from_version(&gtx, Version::new(3))
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version, Version::new(3));
}

#[tokio::test]
#[serial]
async fn snapshot_update_replaces_existing() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    store
        .save_snapshot(Snapshot::new(
            gtx.clone(),
            Version::new(2),
            serde_json::json!({"last_state": "PARTIALLY_ACTIVE"}),
        ))
        .await
        .unwrap();
    store
        .save_snapshot(Snapshot::new(
            gtx.clone(),
            Version::new(5),
            serde_json::json!({"last_state": "PARTIALLY_COMMITTED"}),
        ))
        .await
        .unwrap();

    let snapshot = store.get_snapshot(&gtx).await.unwrap().unwrap();
    assert_eq!(snapshot.version, Version::new(5));
    assert_eq!(snapshot.state["last_state"], "PARTIALLY_COMMITTED");
}

#[tokio::test]
#[serial]
async fn snapshot_not_found() {
    let store = get_test_store().await;
    let snapshot = store.get_snapshot(&GlobalTxId::new()).await.unwrap();
    assert!(snapshot.is_none());
}

#[tokio::test]
#[serial]
async fn load_stream_replays_after_snapshot() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    let events = (1..=3)
        .map(|v| create_test_event(&gtx, v, "TxAdded"))
        .collect();
    store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    store
        .save_snapshot(Snapshot::new(gtx.clone(), Version::new(2), serde_json::json!({})))
        .await
        .unwrap();

    let (snapshot, tail) = store.load_stream(&gtx).await.unwrap();
    assert_eq!(snapshot.map(|s| s.version), Some(Version::new(2)));
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].version, Version::new(3));
}

#[tokio::test]
#[serial]
async fn load_stream_reports_missing_journal_entry() {
    let store = get_test_store().await;
    let gtx = GlobalTxId::new();

    let events = (1..=3)
        .map(|v| create_test_event(&gtx, v, "TxAdded"))
        .collect();
    store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    sqlx::query("DELETE FROM saga_journal WHERE global_tx_id = $1 AND version = 2")
        .bind(gtx.as_str())
        .execute(store.pool())
        .await
        .unwrap();

    match store.load_stream(&gtx).await {
        Err(EventStoreError::JournalGap {
            expected, found, ..
        }) => {
            assert_eq!(expected, Version::new(2));
            assert_eq!(found, Version::new(3));
        }
        other => panic!("expected a journal gap, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn list_streams_and_purge() {
    let store = get_test_store().await;
    let first = GlobalTxId::from("gtx-a");
    let second = GlobalTxId::from("gtx-b");

    store
        .append_event(create_test_event(&first, 1, "SagaStarted"), AppendOptions::expect_new())
        .await
        .unwrap();
    store
        .save_snapshot(Snapshot::new(second.clone(), Version::new(1), serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(
        store.list_streams().await.unwrap(),
        vec![first.clone(), second.clone()]
    );

    store.purge(&first).await.unwrap();
    store.purge(&second).await.unwrap();

    assert!(store.list_streams().await.unwrap().is_empty());
    assert!(!store.stream_exists(&first).await.unwrap());
    assert!(store.get_snapshot(&second).await.unwrap().is_none());
}
