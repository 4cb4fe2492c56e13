//! Journaled domain events of a saga.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{SagaState, SuspendedType};
use crate::tx_entity::TxEntity;

/// Facts recorded in a saga's journal.
///
/// Folding these over an empty [`SagaData`](crate::SagaData) rebuilds the
/// saga exactly, including its machine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaDomainEvent {
    /// An inbound event was accepted; kept for the audit log.
    EventReceived {
        event_type: String,
        local_tx_id: Option<String>,
        create_time: DateTime<Utc>,
    },
    SagaStarted {
        service_name: String,
        instance_id: String,
        begin_time: DateTime<Utc>,
        timeout_seconds: i64,
        expiration_time: Option<DateTime<Utc>>,
    },
    TxAdded(TxEntity),
    TxCommitted {
        local_tx_id: String,
        end_time: DateTime<Utc>,
    },
    TxFailed {
        local_tx_id: String,
        end_time: DateTime<Utc>,
        failure_payload: Vec<u8>,
    },
    /// A compensation command is about to be dispatched.
    CompensationSent { local_tx_id: String, retry: bool },
    CompensationSucceeded { local_tx_id: String },
    /// A failed or timed-out attempt; `exhausted` when no retry is left.
    CompensationFailed {
        local_tx_id: String,
        payload: Vec<u8>,
        exhausted: bool,
    },
    /// The machine moved to a non-terminal state.
    Transitioned { to: SagaState },
    /// The machine reached a terminal state.
    SagaEnded {
        state: SagaState,
        suspended_type: SuspendedType,
        end_time: DateTime<Utc>,
    },
}

impl SagaDomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaDomainEvent::EventReceived { .. } => "EventReceived",
            SagaDomainEvent::SagaStarted { .. } => "SagaStarted",
            SagaDomainEvent::TxAdded(_) => "TxAdded",
            SagaDomainEvent::TxCommitted { .. } => "TxCommitted",
            SagaDomainEvent::TxFailed { .. } => "TxFailed",
            SagaDomainEvent::CompensationSent { .. } => "CompensationSent",
            SagaDomainEvent::CompensationSucceeded { .. } => "CompensationSucceeded",
            SagaDomainEvent::CompensationFailed { .. } => "CompensationFailed",
            SagaDomainEvent::Transitioned { .. } => "Transitioned",
            SagaDomainEvent::SagaEnded { .. } => "SagaEnded",
        }
    }
}
