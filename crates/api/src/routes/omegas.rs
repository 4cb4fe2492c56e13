//! Participant sessions: long-polling for compensation commands.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga::{CompensateCommand, ParticipantId};
use tokio::sync::Mutex;

use crate::{AppState, CommandReceiver};

/// Returns the participant's command queue, connecting it first if it has
/// no live connection.
async fn session(state: &AppState, participant: ParticipantId) -> CommandReceiver {
    let mut sessions = state.sessions.lock().await;
    if let Some(rx) = sessions.get(&participant)
        && state.registry.is_connected(&participant).await
    {
        return Arc::clone(rx);
    }

    let rx = Arc::new(Mutex::new(state.registry.connect(participant.clone()).await));
    sessions.insert(participant, Arc::clone(&rx));
    rx
}

/// GET /omegas/{service_name}/{instance_id}/commands
///
/// Waits up to the configured poll time for the first command, then returns
/// it together with everything else already queued. An empty list means
/// nothing arrived in time.
#[tracing::instrument(skip(state))]
pub async fn poll_commands(
    State(state): State<Arc<AppState>>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> Json<Vec<CompensateCommand>> {
    let participant = ParticipantId::new(service_name, instance_id);
    let rx = session(&state, participant).await;
    let mut rx = rx.lock().await;

    let mut commands = Vec::new();
    if let Ok(Some(command)) = tokio::time::timeout(state.command_poll_wait, rx.recv()).await {
        commands.push(command);
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
    }

    if !commands.is_empty() {
        tracing::debug!(count = commands.len(), "delivering compensation commands");
    }
    Json(commands)
}

/// DELETE /omegas/{service_name}/{instance_id}
///
/// Commands still queued for the instance are dropped; later ones go to
/// another instance of the same service, if any.
#[tracing::instrument(skip(state))]
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> StatusCode {
    let participant = ParticipantId::new(service_name, instance_id);
    state.registry.disconnect(&participant).await;
    state.sessions.lock().await.remove(&participant);
    StatusCode::NO_CONTENT
}
