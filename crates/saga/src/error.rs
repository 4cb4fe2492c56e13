//! Saga error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::tx_entity::TxState;

/// Errors that can occur while coordinating a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A domain event referenced a sub-transaction that was never added.
    #[error("Unknown sub-transaction: {0}")]
    UnknownTx(String),

    /// A sub-transaction with this local id was added twice.
    #[error("Duplicate sub-transaction: {0}")]
    DuplicateTx(String),

    /// A sub-transaction was moved along an edge its lifecycle does not have.
    #[error("Illegal transition of sub-transaction '{local_tx_id}': {from} -> {to}")]
    IllegalTransition {
        local_tx_id: String,
        from: TxState,
        to: TxState,
    },

    /// An ack was applied with no compensation in flight.
    #[error("Compensation running counter would become negative")]
    CounterUnderflow,

    /// A domain event was applied after the saga reached a terminal state.
    #[error("Saga has already terminated")]
    AlreadyTerminated,

    /// The inbound event failed validation.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// No connected participant could take the compensation command.
    #[error("No connected participant for {service_name}/{instance_id}")]
    ParticipantUnavailable {
        service_name: String,
        instance_id: String,
    },

    /// The router has been shut down.
    #[error("Saga router is closed")]
    RouterClosed,

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
