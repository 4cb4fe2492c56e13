//! Read-only saga reporting.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::GlobalTxId;
use saga::{SagaData, SagaState, SuspendedType};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaSummary {
    pub global_tx_id: String,
    pub service_name: String,
    pub state: SagaState,
    pub suspended_type: SuspendedType,
    pub terminated: bool,
    pub tx_count: usize,
    pub duration_millis: Option<i64>,
}

impl From<&SagaData> for SagaSummary {
    fn from(data: &SagaData) -> Self {
        Self {
            global_tx_id: data.global_tx_id.to_string(),
            service_name: data.service_name.clone(),
            state: data.last_state,
            suspended_type: data.suspended_type,
            terminated: data.terminated,
            tx_count: data.tx_entities.len(),
            duration_millis: data.duration().map(|d| d.num_milliseconds()),
        }
    }
}

/// GET /sagas: every saga reported so far, oldest first.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<SagaSummary>> {
    let sagas = state.repository.list().await;
    Json(sagas.iter().map(SagaSummary::from).collect())
}

/// GET /sagas/{global_tx_id}: full saga data including sub-transactions.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(global_tx_id): Path<String>,
) -> Result<Json<SagaData>, ApiError> {
    let id = GlobalTxId::from(global_tx_id);
    state
        .repository
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))
}
