//! Compensation callbacks to participants.

use std::collections::HashMap;

use async_trait::async_trait;
use common::GlobalTxId;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};

use crate::error::{Result, SagaError};

/// Instruction sent to a participant to undo one local transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensateCommand {
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: String,
    pub parent_tx_id: Option<String>,
    pub compensation_method: String,
    pub payload: Vec<u8>,
}

/// Address of one connected participant instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId {
    pub service_name: String,
    pub instance_id: String,
}

impl ParticipantId {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service_name, self.instance_id)
    }
}

/// Delivers compensation commands to participants.
///
/// Dispatch is fire-and-forget: the outcome comes back later as an ack
/// event on the saga's own queue. An `Err` means nobody could take the
/// command.
#[async_trait]
pub trait CompensationChannel: Send + Sync {
    async fn dispatch(&self, target: &ParticipantId, command: CompensateCommand) -> Result<()>;
}

/// In-process registry of connected participants.
///
/// Each connected instance owns the receiving half of an unbounded queue.
/// When the addressed instance is gone, the command goes to another
/// connected instance of the same service.
#[derive(Debug, Default)]
pub struct OmegaRegistry {
    senders: RwLock<HashMap<ParticipantId, mpsc::UnboundedSender<CompensateCommand>>>,
}

impl OmegaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a participant, replacing any previous connection.
    pub async fn connect(
        &self,
        participant: ParticipantId,
    ) -> mpsc::UnboundedReceiver<CompensateCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(%participant, "participant connected");
        self.senders.write().await.insert(participant, tx);
        rx
    }

    /// Disconnects a participant. Commands still queued for it are dropped.
    pub async fn disconnect(&self, participant: &ParticipantId) {
        if self.senders.write().await.remove(participant).is_some() {
            tracing::info!(%participant, "participant disconnected");
        }
    }

    pub async fn is_connected(&self, participant: &ParticipantId) -> bool {
        self.senders
            .read()
            .await
            .get(participant)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Lists connected participants, sorted.
    pub async fn participants(&self) -> Vec<ParticipantId> {
        let mut participants: Vec<_> = self
            .senders
            .read()
            .await
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(participant, _)| participant.clone())
            .collect();
        participants.sort();
        participants
    }
}

#[async_trait]
impl CompensationChannel for OmegaRegistry {
    async fn dispatch(&self, target: &ParticipantId, command: CompensateCommand) -> Result<()> {
        let mut senders = self.senders.write().await;

        // Receivers dropped without a disconnect leave closed senders behind
        senders.retain(|_, tx| !tx.is_closed());

        let sender = senders.get(target).or_else(|| {
            senders
                .iter()
                .filter(|(participant, _)| participant.service_name == target.service_name)
                .min_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, tx)| tx)
        });

        let unavailable = || SagaError::ParticipantUnavailable {
            service_name: target.service_name.clone(),
            instance_id: target.instance_id.clone(),
        };

        let tx = sender.ok_or_else(unavailable)?;
        tx.send(command).map_err(|_| unavailable())
    }
}
