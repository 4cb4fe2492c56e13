//! Reporting sink for saga data.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use common::GlobalTxId;
use tokio::sync::RwLock;

use crate::data::SagaData;
use crate::error::Result;

/// Receives the latest saga data after every transition.
#[async_trait]
pub trait SagaDataSink: Send + Sync {
    /// Records the current data of a saga.
    async fn put(&self, data: &SagaData) -> Result<()>;

    /// Signals that the saga terminated and will not be put again.
    async fn stop(&self, global_tx_id: &GlobalTxId) -> Result<()>;
}

/// In-memory sink that keeps the latest data of every saga for queries.
#[derive(Debug, Default)]
pub struct InMemorySagaDataRepository {
    sagas: RwLock<HashMap<GlobalTxId, SagaData>>,
    stopped: RwLock<HashSet<GlobalTxId>>,
}

impl InMemorySagaDataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, global_tx_id: &GlobalTxId) -> Option<SagaData> {
        self.sagas.read().await.get(global_tx_id).cloned()
    }

    /// Lists all sagas, oldest first.
    pub async fn list(&self) -> Vec<SagaData> {
        let mut sagas: Vec<SagaData> = self.sagas.read().await.values().cloned().collect();
        sagas.sort_by(|a, b| {
            a.begin_time
                .cmp(&b.begin_time)
                .then_with(|| a.global_tx_id.cmp(&b.global_tx_id))
        });
        sagas
    }

    pub async fn count(&self) -> usize {
        self.sagas.read().await.len()
    }

    pub async fn is_stopped(&self, global_tx_id: &GlobalTxId) -> bool {
        self.stopped.read().await.contains(global_tx_id)
    }
}

#[async_trait]
impl SagaDataSink for InMemorySagaDataRepository {
    async fn put(&self, data: &SagaData) -> Result<()> {
        self.sagas
            .write()
            .await
            .insert(data.global_tx_id.clone(), data.clone());
        Ok(())
    }

    async fn stop(&self, global_tx_id: &GlobalTxId) -> Result<()> {
        self.stopped.write().await.insert(global_tx_id.clone());
        Ok(())
    }
}
