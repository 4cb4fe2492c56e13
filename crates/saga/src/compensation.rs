//! Compensation orchestration: what to undo, when to retry, when to stop.

use std::time::Duration;

use crate::channel::{CompensateCommand, ParticipantId};
use crate::domain::SagaDomainEvent;
use crate::error::{Result, SagaError};
use crate::machine::{Effect, Planner};
use crate::state::{SagaState, SuspendedType};
use crate::tx_entity::TxState;

const ACK_TIMEOUT_PAYLOAD: &[u8] = b"compensation ack timed out";

/// Stateless helpers the state machine uses while in `FAILED`.
pub struct CompensationDriver;

impl CompensationDriver {
    /// Dispatches compensation for every committed sub-transaction,
    /// newest first.
    pub(crate) fn compensate_committed(p: &mut Planner<'_>) -> Result<()> {
        let committed: Vec<String> = p
            .data()
            .tx_entities
            .iter()
            .rev()
            .filter(|tx| tx.state == TxState::Committed)
            .map(|tx| tx.local_tx_id.clone())
            .collect();

        for local_tx_id in committed {
            Self::dispatch(p, &local_tx_id, false)?;
        }
        Ok(())
    }

    /// Dispatches compensation for one just-committed sub-transaction.
    pub(crate) fn compensate_one(p: &mut Planner<'_>, local_tx_id: &str) -> Result<()> {
        Self::dispatch(p, local_tx_id, false)
    }

    /// Returns true if an ack for `local_tx_id` is currently expected.
    pub(crate) fn awaiting_ack(p: &Planner<'_>, local_tx_id: &str) -> bool {
        let awaiting = p
            .data()
            .entity(local_tx_id)
            .is_some_and(|tx| tx.state == TxState::CompensationSent);
        if !awaiting {
            tracing::debug!(local_tx_id, "ack for compensation not in flight ignored");
        }
        awaiting
    }

    /// Records a failed attempt and schedules a retry if one is left.
    pub(crate) fn on_failure(p: &mut Planner<'_>, local_tx_id: &str, payload: &[u8]) -> Result<()> {
        let tx = p
            .data()
            .entity(local_tx_id)
            .ok_or_else(|| SagaError::UnknownTx(local_tx_id.to_string()))?;
        let can_retry = tx.can_retry();
        let attempt = tx.retries_attempted + 1;
        let delay = Duration::from_millis(tx.retry_delay_millis);

        let payload = Self::truncate(payload, p.settings().payload_max_length);
        p.emit(SagaDomainEvent::CompensationFailed {
            local_tx_id: local_tx_id.to_string(),
            payload,
            exhausted: !can_retry,
        })?;

        if can_retry {
            p.effect(Effect::ScheduleRetry {
                local_tx_id: local_tx_id.to_string(),
                attempt,
                delay,
            });
        } else {
            tracing::warn!(local_tx_id, "compensation retries exhausted");
        }
        Ok(())
    }

    /// Handles an expired ack timer; stale timers are ignored.
    pub(crate) fn on_ack_timeout(
        p: &mut Planner<'_>,
        local_tx_id: &str,
        attempt: i32,
    ) -> Result<()> {
        let current = p.data().entity(local_tx_id).is_some_and(|tx| {
            tx.state == TxState::CompensationSent && tx.retries_attempted == attempt
        });
        if !current {
            return Ok(());
        }
        Self::on_failure(p, local_tx_id, ACK_TIMEOUT_PAYLOAD)?;
        Self::completion_check(p)
    }

    /// Re-dispatches a failed compensation; stale retries are ignored.
    pub(crate) fn on_retry_due(p: &mut Planner<'_>, local_tx_id: &str, attempt: i32) -> Result<()> {
        let due = p
            .data()
            .entity(local_tx_id)
            .is_some_and(|tx| tx.awaiting_retry() && tx.retries_attempted + 1 == attempt);
        if !due {
            return Ok(());
        }
        Self::dispatch(p, local_tx_id, true)
    }

    /// Ends the saga once compensation is quiescent.
    pub(crate) fn completion_check(p: &mut Planner<'_>) -> Result<()> {
        if !p.data().is_quiescent() {
            return Ok(());
        }
        if p.data().suspended_type == SuspendedType::CompensateFailed {
            p.end(SagaState::Suspended, SuspendedType::CompensateFailed)
        } else {
            p.end(SagaState::Compensated, SuspendedType::None)
        }
    }

    /// Cuts a payload down to at most `max` bytes.
    pub fn truncate(payload: &[u8], max: usize) -> Vec<u8> {
        payload[..payload.len().min(max)].to_vec()
    }

    fn dispatch(p: &mut Planner<'_>, local_tx_id: &str, retry: bool) -> Result<()> {
        p.emit(SagaDomainEvent::CompensationSent {
            local_tx_id: local_tx_id.to_string(),
            retry,
        })?;

        let tx = p
            .data()
            .entity(local_tx_id)
            .ok_or_else(|| SagaError::UnknownTx(local_tx_id.to_string()))?;
        let effect = Effect::Compensate {
            target: ParticipantId::new(&tx.service_name, &tx.instance_id),
            command: CompensateCommand {
                global_tx_id: tx.global_tx_id.clone(),
                local_tx_id: tx.local_tx_id.clone(),
                parent_tx_id: tx.parent_tx_id.clone(),
                compensation_method: tx.compensation_method.clone(),
                payload: tx.payload.clone(),
            },
            attempt: tx.retries_attempted,
            ack_timeout: (tx.reverse_timeout_seconds > 0)
                .then(|| Duration::from_secs(tx.reverse_timeout_seconds as u64)),
        };
        p.effect(effect);
        Ok(())
    }
}
