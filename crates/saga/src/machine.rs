//! The per-saga state machine.
//!
//! [`SagaStateMachine::decide`] is pure: given the current data and one
//! message it returns the domain events to journal and the effects to run
//! once they are durable. Nothing here touches the network, the store or
//! the clock.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::channel::{CompensateCommand, ParticipantId};
use crate::compensation::CompensationDriver;
use crate::data::SagaData;
use crate::domain::SagaDomainEvent;
use crate::error::Result;
use crate::events::SagaEvent;
use crate::settings::SagaSettings;
use crate::state::{SagaState, SuspendedType};
use crate::tx_entity::{TxEntity, TxState};

/// Everything a saga worker reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaMessage {
    /// An inbound event from a participant.
    Event(SagaEvent),
    /// The saga's expiration time passed.
    SagaDeadline,
    /// No ack arrived for compensation attempt `attempt` in time.
    AckTimeout { local_tx_id: String, attempt: i32 },
    /// The delay before compensation attempt `attempt` elapsed.
    RetryDue { local_tx_id: String, attempt: i32 },
}

/// Side effects to run after the decided events are journaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Compensate {
        target: ParticipantId,
        command: CompensateCommand,
        attempt: i32,
        ack_timeout: Option<Duration>,
    },
    ScheduleRetry {
        local_tx_id: String,
        attempt: i32,
        delay: Duration,
    },
    ArmSagaDeadline { at: DateTime<Utc> },
}

/// Result of [`SagaStateMachine::decide`]. Empty when the message is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub events: Vec<SagaDomainEvent>,
    pub effects: Vec<Effect>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.effects.is_empty()
    }
}

/// Accumulates a decision while keeping a scratch copy of the data
/// up to date, so later steps see earlier ones.
pub(crate) struct Planner<'a> {
    data: SagaData,
    settings: &'a SagaSettings,
    now: DateTime<Utc>,
    decision: Decision,
}

impl<'a> Planner<'a> {
    fn new(data: &SagaData, settings: &'a SagaSettings, now: DateTime<Utc>) -> Self {
        Self {
            data: data.clone(),
            settings,
            now,
            decision: Decision::default(),
        }
    }

    pub(crate) fn data(&self) -> &SagaData {
        &self.data
    }

    pub(crate) fn settings(&self) -> &SagaSettings {
        self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub(crate) fn emit(&mut self, event: SagaDomainEvent) -> Result<()> {
        self.data.apply(&event)?;
        self.decision.events.push(event);
        Ok(())
    }

    pub(crate) fn effect(&mut self, effect: Effect) {
        self.decision.effects.push(effect);
    }

    fn received(&mut self, event: &SagaEvent) -> Result<()> {
        self.emit(SagaDomainEvent::EventReceived {
            event_type: event.event_type().to_string(),
            local_tx_id: event.local_tx_id().map(str::to_string),
            create_time: event.header().create_time,
        })
    }

    fn transition(&mut self, to: SagaState) -> Result<()> {
        if self.data.last_state == to {
            return Ok(());
        }
        self.emit(SagaDomainEvent::Transitioned { to })
    }

    pub(crate) fn end(&mut self, state: SagaState, suspended_type: SuspendedType) -> Result<()> {
        let end_time = self.now;
        self.emit(SagaDomainEvent::SagaEnded {
            state,
            suspended_type,
            end_time,
        })
    }

    fn finish(self) -> Decision {
        self.decision
    }
}

/// Pure transition logic of a saga.
#[derive(Debug, Clone, Default)]
pub struct SagaStateMachine {
    settings: SagaSettings,
}

impl SagaStateMachine {
    pub fn new(settings: SagaSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SagaSettings {
        &self.settings
    }

    /// Decides how `data` reacts to `message`.
    ///
    /// An error means the decided events would not fold cleanly; the saga
    /// cannot continue.
    pub fn decide(
        &self,
        data: &SagaData,
        message: &SagaMessage,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        if data.terminated {
            return Ok(Decision::default());
        }

        let mut planner = Planner::new(data, &self.settings, now);
        let state = data.last_state;

        match message {
            SagaMessage::Event(event) => on_event(&mut planner, state, event)?,
            SagaMessage::SagaDeadline => {
                if state.can_time_out() {
                    planner.end(SagaState::Suspended, SuspendedType::Timeout)?;
                }
            }
            SagaMessage::AckTimeout {
                local_tx_id,
                attempt,
            } => {
                if state == SagaState::Failed {
                    CompensationDriver::on_ack_timeout(&mut planner, local_tx_id, *attempt)?;
                }
            }
            SagaMessage::RetryDue {
                local_tx_id,
                attempt,
            } => {
                if state == SagaState::Failed {
                    CompensationDriver::on_retry_due(&mut planner, local_tx_id, *attempt)?;
                }
            }
        }

        Ok(planner.finish())
    }
}

fn on_event(p: &mut Planner<'_>, state: SagaState, event: &SagaEvent) -> Result<()> {
    use SagaState::*;

    match (state, event) {
        (Idle, SagaEvent::SagaStarted(data)) => {
            p.received(event)?;
            let begin_time = data.header.create_time;
            let expiration_time = data.expiration_time()?;
            p.emit(SagaDomainEvent::SagaStarted {
                service_name: data.header.service_name.clone(),
                instance_id: data.header.instance_id.clone(),
                begin_time,
                timeout_seconds: data.timeout_seconds,
                expiration_time,
            })?;
            p.transition(Ready)?;
            if let Some(at) = expiration_time {
                p.effect(Effect::ArmSagaDeadline { at });
            }
        }

        (Ready | PartiallyActive | PartiallyCommitted | Failed, SagaEvent::TxStarted(data)) => {
            if p.data().entity(&data.local_tx_id).is_some() {
                tracing::debug!(local_tx_id = %data.local_tx_id, "duplicate TxStarted ignored");
                return Ok(());
            }
            p.received(event)?;
            p.emit(SagaDomainEvent::TxAdded(TxEntity {
                service_name: data.header.service_name.clone(),
                instance_id: data.header.instance_id.clone(),
                global_tx_id: data.header.global_tx_id.clone(),
                local_tx_id: data.local_tx_id.clone(),
                parent_tx_id: data.parent_tx_id.clone(),
                compensation_method: data.compensation_method.clone(),
                payload: data.payload.clone(),
                state: TxState::Active,
                begin_time: data.header.create_time,
                end_time: None,
                reverse_retries: data.reverse_retries,
                reverse_timeout_seconds: data.reverse_timeout_seconds,
                retry_delay_millis: data.retry_delay_millis,
                retries_attempted: 0,
                failure_payload: Vec::new(),
            }))?;
            if state != Failed {
                p.transition(PartiallyActive)?;
            }
        }

        (Ready, SagaEvent::SagaEnded(_) | SagaEvent::SagaAborted(_)) => {
            p.received(event)?;
            p.end(Suspended, SuspendedType::Unpredictable)?;
        }

        (Ready | PartiallyActive | PartiallyCommitted | Failed, SagaEvent::SagaTimeout(_)) => {
            p.received(event)?;
            p.end(Suspended, SuspendedType::Timeout)?;
        }

        (PartiallyActive | PartiallyCommitted | Failed, SagaEvent::TxEnded(data)) => {
            if !is_active(p, &data.local_tx_id) {
                return Ok(());
            }
            p.received(event)?;
            p.emit(SagaDomainEvent::TxCommitted {
                local_tx_id: data.local_tx_id.clone(),
                end_time: data.header.create_time,
            })?;
            if state == Failed {
                // Committed after the saga failed: undo it right away.
                CompensationDriver::compensate_one(p, &data.local_tx_id)?;
            } else {
                p.transition(PartiallyCommitted)?;
            }
        }

        (PartiallyActive | PartiallyCommitted | Failed, SagaEvent::TxAborted(data)) => {
            if !is_active(p, &data.local_tx_id) {
                return Ok(());
            }
            p.received(event)?;
            let failure_payload =
                CompensationDriver::truncate(&data.payload, p.settings().payload_max_length);
            p.emit(SagaDomainEvent::TxFailed {
                local_tx_id: data.local_tx_id.clone(),
                end_time: data.header.create_time,
                failure_payload,
            })?;
            if state != Failed {
                p.transition(Failed)?;
                CompensationDriver::compensate_committed(p)?;
            }
        }

        (PartiallyCommitted, SagaEvent::SagaEnded(_)) => {
            p.received(event)?;
            p.end(Committed, SuspendedType::None)?;
        }

        (PartiallyCommitted, SagaEvent::SagaAborted(_)) => {
            p.received(event)?;
            p.transition(Failed)?;
            CompensationDriver::compensate_committed(p)?;
        }

        (Failed, SagaEvent::SagaAborted(_)) => {
            p.received(event)?;
            if p.data().has_tx_in(TxState::Committed) {
                CompensationDriver::compensate_committed(p)?;
            } else {
                CompensationDriver::completion_check(p)?;
            }
        }

        (Failed, SagaEvent::TxCompensateAckSucceeded(data)) => {
            if !CompensationDriver::awaiting_ack(p, &data.local_tx_id) {
                return Ok(());
            }
            p.received(event)?;
            p.emit(SagaDomainEvent::CompensationSucceeded {
                local_tx_id: data.local_tx_id.clone(),
            })?;
            CompensationDriver::completion_check(p)?;
        }

        (
            Failed,
            SagaEvent::TxCompensateAckFailed(data) | SagaEvent::CompensateAckTimeout(data),
        ) => {
            if !CompensationDriver::awaiting_ack(p, &data.local_tx_id) {
                return Ok(());
            }
            p.received(event)?;
            CompensationDriver::on_failure(p, &data.local_tx_id, &data.payload)?;
            CompensationDriver::completion_check(p)?;
        }

        _ => {
            tracing::debug!(
                %state,
                event_type = event.event_type(),
                local_tx_id = event.local_tx_id(),
                "unhandled event ignored"
            );
        }
    }

    Ok(())
}

fn is_active(p: &Planner<'_>, local_tx_id: &str) -> bool {
    match p.data().entity(local_tx_id) {
        Some(tx) if tx.state == TxState::Active => true,
        Some(tx) => {
            tracing::debug!(local_tx_id, state = %tx.state, "sub-transaction already settled");
            false
        }
        None => {
            tracing::debug!(local_tx_id, "unknown sub-transaction");
            false
        }
    }
}
