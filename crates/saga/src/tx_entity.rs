//! Sub-transaction bookkeeping.

use chrono::{DateTime, Utc};
use common::GlobalTxId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Lifecycle of one sub-transaction.
///
/// ```text
/// Active ──► Committed ──► CompensationSent ──► CompensatedSucceed
///   │                        ▲          │
///   ▼                        └─ retry ──┤
/// Failed                                ▼
///                                CompensatedFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    #[default]
    Active,
    Failed,
    Committed,
    CompensationSent,
    CompensatedSucceed,
    CompensatedFailed,
}

impl TxState {
    /// Returns true if `self -> to` is an edge of the lifecycle.
    pub fn can_transition_to(&self, to: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, to),
            (Active, Committed)
                | (Active, Failed)
                | (Committed, CompensationSent)
                | (CompensatedFailed, CompensationSent)
                | (CompensationSent, CompensatedSucceed)
                | (CompensationSent, CompensatedFailed)
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Active => "ACTIVE",
            TxState::Failed => "FAILED",
            TxState::Committed => "COMMITTED",
            TxState::CompensationSent => "COMPENSATION_SENT",
            TxState::CompensatedSucceed => "COMPENSATED_SUCCEED",
            TxState::CompensatedFailed => "COMPENSATED_FAILED",
        }
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One local transaction executed by a participant within a saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntity {
    pub service_name: String,
    pub instance_id: String,
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: String,
    pub parent_tx_id: Option<String>,
    pub compensation_method: String,
    pub payload: Vec<u8>,
    pub state: TxState,
    pub begin_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Re-dispatches allowed after the first compensation attempt.
    pub reverse_retries: i32,
    /// Ack timeout per compensation attempt; 0 disables it.
    pub reverse_timeout_seconds: i64,
    pub retry_delay_millis: u64,
    pub retries_attempted: i32,
    pub failure_payload: Vec<u8>,
}

impl TxEntity {
    /// Moves the entity to `to`, rejecting edges the lifecycle does not have.
    pub fn transition(&mut self, to: TxState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(SagaError::IllegalTransition {
                local_tx_id: self.local_tx_id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Returns true if another compensation attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retries_attempted < self.reverse_retries
    }

    /// Returns true if the last attempt failed and a retry is still owed.
    pub fn awaiting_retry(&self) -> bool {
        self.state == TxState::CompensatedFailed && self.can_retry()
    }
}
