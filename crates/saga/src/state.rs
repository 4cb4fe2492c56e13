//! Saga state machine states.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Idle ──► Ready ──► PartiallyActive ◄──► PartiallyCommitted ──► Committed
///            │             │                      │
///            │             └──────► Failed ◄──────┘
///            │                        │
///            └──► Suspended ◄─────────┴──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// No `SagaStarted` seen yet.
    #[default]
    Idle,

    /// Saga started, no sub-transaction yet.
    Ready,

    /// At least one sub-transaction is running.
    PartiallyActive,

    /// The latest sub-transaction committed.
    PartiallyCommitted,

    /// A sub-transaction or the saga aborted; compensation is in progress.
    Failed,

    /// Saga ended normally (terminal state).
    Committed,

    /// Saga stopped without a clean outcome (terminal state).
    Suspended,

    /// Every committed sub-transaction was compensated (terminal state).
    Compensated,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Committed | SagaState::Suspended | SagaState::Compensated
        )
    }

    /// Returns true if a saga deadline applies in this state.
    pub fn can_time_out(&self) -> bool {
        matches!(
            self,
            SagaState::Ready
                | SagaState::PartiallyActive
                | SagaState::PartiallyCommitted
                | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Idle => "IDLE",
            SagaState::Ready => "READY",
            SagaState::PartiallyActive => "PARTIALLY_ACTIVE",
            SagaState::PartiallyCommitted => "PARTIALLY_COMMITTED",
            SagaState::Failed => "FAILED",
            SagaState::Committed => "COMMITTED",
            SagaState::Suspended => "SUSPENDED",
            SagaState::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a saga ended up suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuspendedType {
    #[default]
    None,
    Timeout,
    Unpredictable,
    CompensateFailed,
}
