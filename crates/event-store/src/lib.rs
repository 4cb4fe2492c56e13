//! Per-transaction event journal for the saga coordinator.
//!
//! Every global transaction owns one append-only stream of domain events,
//! plus an optional snapshot of its folded state. Both are purged once the
//! transaction terminates.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::GlobalTxId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt};
