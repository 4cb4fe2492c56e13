//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_sagas: usize,
    pub connected_participants: usize,
}

/// GET /health: liveness plus a glance at router and registry load.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_sagas: state.router.live_count().await,
        connected_participants: state.registry.participants().await.len(),
    })
}
