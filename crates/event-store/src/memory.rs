use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, GlobalTxId, Result, Snapshot, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// In-memory event store implementation.
///
/// Used by tests and by the server when no database is configured. It
/// provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<GlobalTxId, Vec<EventEnvelope>>>>,
    snapshots: Arc<RwLock<HashMap<GlobalTxId, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Returns the number of stored snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        self.streams.write().await.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let stream_id = events[0].stream_id.clone();
        let first_new_version = events[0].version;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(stream_id.clone()).or_default();

        let current_version = stream
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        // Check expected version if specified
        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual: current_version,
            });
        }

        // Check for version conflicts (unique constraint simulation)
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        stream.extend(events);

        Ok(last_version)
    }

    async fn get_events(&self, stream_id: &GlobalTxId) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }

    async fn get_events_from_version(
        &self,
        stream_id: &GlobalTxId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.version >= from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_stream_version(&self, stream_id: &GlobalTxId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .and_then(|events| events.last())
            .map(|e| e.version))
    }

    async fn list_streams(&self) -> Result<Vec<GlobalTxId>> {
        let streams = self.streams.read().await;
        let snapshots = self.snapshots.read().await;
        let mut ids: Vec<GlobalTxId> = streams
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(id, _)| id.clone())
            .chain(snapshots.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.stream_id.clone(), snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, stream_id: &GlobalTxId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(stream_id).cloned())
    }

    async fn purge(&self, stream_id: &GlobalTxId) -> Result<()> {
        self.streams.write().await.remove(stream_id);
        self.snapshots.write().await.remove(stream_id);
        Ok(())
    }
}
