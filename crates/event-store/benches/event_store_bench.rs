use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendOptions, EventEnvelope, EventStoreExt, GlobalTxId, InMemoryEventStore, Version,
    store::EventStore,
};

fn make_event(stream_id: &GlobalTxId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream_id.clone())
        .event_type("TxAdded")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "type": "TxAdded",
            "data": {
                "local_tx_id": format!("ltx-{version}"),
                "service_name": "inventory",
                "instance_id": "inventory-1"
            }
        }))
        .build()
        .unwrap()
}

fn bench_append_with_version_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_with_version_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let gtx = GlobalTxId::new();
                for v in 1..=10 {
                    store
                        .append_event(
                            make_event(&gtx, v),
                            AppendOptions::expect_version(Version::new(v - 1)),
                        )
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_load_stream_with_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let gtx = GlobalTxId::new();

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=200).map(|v| make_event(&gtx, v)).collect();
        store.append(events, AppendOptions::expect_new()).await.unwrap();
        store
            .save_snapshot(event_store::Snapshot::new(
                gtx.clone(),
                Version::new(100),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
    });

    c.bench_function("event_store/load_stream_with_snapshot", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_stream(&gtx).await.unwrap();
            });
        });
    });
}

fn bench_purge(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/purge", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let gtx = GlobalTxId::new();
                let events: Vec<EventEnvelope> = (1..=20).map(|v| make_event(&gtx, v)).collect();
                store.append(events, AppendOptions::expect_new()).await.unwrap();
                store.purge(&gtx).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_with_version_check,
    bench_load_stream_with_snapshot,
    bench_purge
);
criterion_main!(benches);
