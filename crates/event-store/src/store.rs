use async_trait::async_trait;

use crate::{EventEnvelope, EventStoreError, GlobalTxId, Result, Snapshot, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected journal version for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the journal to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the journal to be empty.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Journal of domain events, one stream per global transaction.
///
/// Implementations are shared by every transaction worker and must be
/// safe for concurrent use. No ordering is guaranteed across streams.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to a stream.
    ///
    /// Events are appended atomically - either all succeed or none do.
    /// If `options.expected_version` is set, the operation will fail with
    /// `ConcurrencyConflict` if the current version doesn't match.
    ///
    /// Returns the new version of the stream after appending.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves all events of a stream, oldest first.
    async fn get_events(&self, stream_id: &GlobalTxId) -> Result<Vec<EventEnvelope>>;

    /// Retrieves the events of a stream starting at `from_version` (inclusive).
    ///
    /// Useful when replaying from a snapshot.
    async fn get_events_from_version(
        &self,
        stream_id: &GlobalTxId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Gets the current version of a stream, None if it has no events.
    async fn get_stream_version(&self, stream_id: &GlobalTxId) -> Result<Option<Version>>;

    /// Lists every stream that still has events or a snapshot.
    async fn list_streams(&self) -> Result<Vec<GlobalTxId>>;

    /// Saves a snapshot, replacing any previous one for the stream.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot of a stream.
    async fn get_snapshot(&self, stream_id: &GlobalTxId) -> Result<Option<Snapshot>>;

    /// Deletes the stream's events and snapshot.
    ///
    /// Purging a stream that does not exist is not an error.
    async fn purge(&self, stream_id: &GlobalTxId) -> Result<()>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream_id: &GlobalTxId) -> Result<bool> {
        Ok(self.get_stream_version(stream_id).await?.is_some())
    }

    /// Loads a stream's events, optionally starting from a snapshot.
    ///
    /// If a snapshot exists, returns the snapshot and events after it.
    /// Otherwise, returns None and all events. Fails with `JournalGap` if the
    /// events do not follow on from the snapshot without holes.
    async fn load_stream(
        &self,
        stream_id: &GlobalTxId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        let Some(snapshot) = self.get_snapshot(stream_id).await? else {
            let events = self.get_events(stream_id).await?;
            check_contiguous(stream_id, Version::first(), &events)?;
            return Ok((None, events));
        };

        let events = self
            .get_events_from_version(stream_id, snapshot.version.next())
            .await?;
        if events.is_empty() {
            // The snapshot may not be ahead of the journal it was folded from
            let journal = self
                .get_stream_version(stream_id)
                .await?
                .unwrap_or(Version::initial());
            if journal < snapshot.version {
                return Err(EventStoreError::JournalGap {
                    stream_id: stream_id.clone(),
                    expected: snapshot.version,
                    found: journal,
                });
            }
        }
        check_contiguous(stream_id, snapshot.version.next(), &events)?;
        Ok((Some(snapshot), events))
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

fn check_contiguous(stream_id: &GlobalTxId, start: Version, events: &[EventEnvelope]) -> Result<()> {
    let mut expected = start;
    for event in events {
        if event.version != expected {
            return Err(EventStoreError::JournalGap {
                stream_id: stream_id.clone(),
                expected,
                found: event.version,
            });
        }
        expected = expected.next();
    }
    Ok(())
}

/// Validates events before appending.
pub(crate) fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    };

    // All events must be for the same stream
    if events.iter().any(|e| e.stream_id != first.stream_id) {
        return Err(EventStoreError::InvalidAppend(
            "All events must be for the same transaction".to_string(),
        ));
    }

    // Versions must be sequential
    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}
