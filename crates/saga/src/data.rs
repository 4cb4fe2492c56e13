//! Saga data and the pure fold of domain events into it.

use chrono::{DateTime, Utc};
use common::GlobalTxId;
use serde::{Deserialize, Serialize};

use crate::domain::SagaDomainEvent;
use crate::error::{Result, SagaError};
use crate::state::{SagaState, SuspendedType};
use crate::tx_entity::{TxEntity, TxState};

/// One accepted inbound event, as shown in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_type: String,
    pub local_tx_id: Option<String>,
    pub create_time: DateTime<Utc>,
}

/// Everything known about one global transaction.
///
/// Only [`SagaData::apply`] mutates it, so a snapshot plus the journal tail
/// always folds to the same value as the full journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaData {
    pub global_tx_id: GlobalTxId,
    pub service_name: String,
    pub instance_id: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub timeout_seconds: i64,
    pub last_state: SagaState,
    pub suspended_type: SuspendedType,
    pub terminated: bool,
    pub compensation_running_counter: u32,
    /// Sub-transactions in insertion order.
    pub tx_entities: Vec<TxEntity>,
    pub events: Vec<EventLogEntry>,
}

impl SagaData {
    pub fn new(global_tx_id: GlobalTxId) -> Self {
        Self {
            global_tx_id,
            service_name: String::new(),
            instance_id: String::new(),
            begin_time: None,
            end_time: None,
            expiration_time: None,
            timeout_seconds: 0,
            last_state: SagaState::Idle,
            suspended_type: SuspendedType::None,
            terminated: false,
            compensation_running_counter: 0,
            tx_entities: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn entity(&self, local_tx_id: &str) -> Option<&TxEntity> {
        self.tx_entities
            .iter()
            .find(|tx| tx.local_tx_id == local_tx_id)
    }

    fn entity_mut(&mut self, local_tx_id: &str) -> Result<&mut TxEntity> {
        self.tx_entities
            .iter_mut()
            .find(|tx| tx.local_tx_id == local_tx_id)
            .ok_or_else(|| SagaError::UnknownTx(local_tx_id.to_string()))
    }

    /// Returns true if any sub-transaction is in `state`.
    pub fn has_tx_in(&self, state: TxState) -> bool {
        self.tx_entities.iter().any(|tx| tx.state == state)
    }

    /// Returns true once no compensation can still change the outcome:
    /// nothing in flight, nothing committed left to undo and no retry owed.
    pub fn is_quiescent(&self) -> bool {
        self.compensation_running_counter == 0
            && !self.has_tx_in(TxState::Committed)
            && !self.tx_entities.iter().any(TxEntity::awaiting_retry)
    }

    /// Time between begin and end, once both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.begin_time?)
    }

    /// Folds one domain event into the data.
    ///
    /// Never performs I/O. Fails if the event contradicts the current
    /// data, which the caller must treat as fatal for this saga.
    pub fn apply(&mut self, event: &SagaDomainEvent) -> Result<()> {
        if self.terminated {
            return Err(SagaError::AlreadyTerminated);
        }

        match event {
            SagaDomainEvent::EventReceived {
                event_type,
                local_tx_id,
                create_time,
            } => {
                self.events.push(EventLogEntry {
                    event_type: event_type.clone(),
                    local_tx_id: local_tx_id.clone(),
                    create_time: *create_time,
                });
            }
            SagaDomainEvent::SagaStarted {
                service_name,
                instance_id,
                begin_time,
                timeout_seconds,
                expiration_time,
            } => {
                self.service_name = service_name.clone();
                self.instance_id = instance_id.clone();
                self.begin_time = Some(*begin_time);
                self.timeout_seconds = *timeout_seconds;
                self.expiration_time = *expiration_time;
            }
            SagaDomainEvent::TxAdded(entity) => {
                if self.entity(&entity.local_tx_id).is_some() {
                    return Err(SagaError::DuplicateTx(entity.local_tx_id.clone()));
                }
                self.tx_entities.push(entity.clone());
            }
            SagaDomainEvent::TxCommitted {
                local_tx_id,
                end_time,
            } => {
                let tx = self.entity_mut(local_tx_id)?;
                tx.transition(TxState::Committed)?;
                tx.end_time = Some(*end_time);
            }
            SagaDomainEvent::TxFailed {
                local_tx_id,
                end_time,
                failure_payload,
            } => {
                let tx = self.entity_mut(local_tx_id)?;
                tx.transition(TxState::Failed)?;
                tx.end_time = Some(*end_time);
                tx.failure_payload = failure_payload.clone();
            }
            SagaDomainEvent::CompensationSent { local_tx_id, retry } => {
                let tx = self.entity_mut(local_tx_id)?;
                tx.transition(TxState::CompensationSent)?;
                if *retry {
                    tx.retries_attempted += 1;
                }
                self.compensation_running_counter += 1;
            }
            SagaDomainEvent::CompensationSucceeded { local_tx_id } => {
                self.entity_mut(local_tx_id)?
                    .transition(TxState::CompensatedSucceed)?;
                self.decrement_counter()?;
            }
            SagaDomainEvent::CompensationFailed {
                local_tx_id,
                payload,
                exhausted,
            } => {
                let tx = self.entity_mut(local_tx_id)?;
                tx.transition(TxState::CompensatedFailed)?;
                tx.failure_payload = payload.clone();
                self.decrement_counter()?;
                if *exhausted {
                    self.suspended_type = SuspendedType::CompensateFailed;
                }
            }
            SagaDomainEvent::Transitioned { to } => {
                self.last_state = *to;
            }
            SagaDomainEvent::SagaEnded {
                state,
                suspended_type,
                end_time,
            } => {
                self.last_state = *state;
                self.suspended_type = *suspended_type;
                self.end_time = Some(*end_time);
                self.terminated = true;
            }
        }

        Ok(())
    }

    fn decrement_counter(&mut self) -> Result<()> {
        self.compensation_running_counter = self
            .compensation_running_counter
            .checked_sub(1)
            .ok_or(SagaError::CounterUnderflow)?;
        Ok(())
    }
}
