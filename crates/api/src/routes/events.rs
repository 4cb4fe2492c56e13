//! Ingestion of saga events reported by participants.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use saga::SagaEvent;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub global_tx_id: String,
    pub event_type: &'static str,
}

/// POST /events: routes one event to its saga.
///
/// Acceptance only means the event was queued for its saga. The outcome
/// shows up later under `/sagas`.
#[tracing::instrument(skip(state, body))]
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let event: SagaEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid event: {e}")))?;

    let response = AcceptedResponse {
        global_tx_id: event.global_tx_id().to_string(),
        event_type: event.event_type(),
    };

    state.router.tell(event).await?;
    metrics::counter!("events_received_total", "type" => response.event_type).increment(1);

    Ok((StatusCode::ACCEPTED, Json(response)))
}
