//! Runtime settings of the saga coordinator.

use std::time::Duration;

/// Tuning knobs handed to the router and every saga worker.
#[derive(Debug, Clone)]
pub struct SagaSettings {
    /// Number of router shards.
    pub shards: usize,
    /// Journal versions between snapshots; 0 disables snapshots.
    pub snapshot_interval: i64,
    /// How long a worker that never saw `SagaStarted` waits before stopping.
    pub idle_passivate: Duration,
    /// Longest failure payload kept in saga data, in bytes.
    pub payload_max_length: usize,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            shards: 10,
            snapshot_interval: 100,
            idle_passivate: Duration::from_secs(60),
            payload_max_length: 10240,
        }
    }
}
