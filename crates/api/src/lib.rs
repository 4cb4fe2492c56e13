//! HTTP gateway of the alpha saga coordinator.
//!
//! Participants post saga events, long-poll for the compensation commands
//! addressed to them, and read saga data for reporting. Structured logging
//! goes through tracing, metrics through Prometheus.

pub mod config;
pub mod error;
pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{CompensateCommand, InMemorySagaDataRepository, OmegaRegistry, ParticipantId, SagaRouter};
use tokio::sync::{Mutex, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Receiving half of a participant's command queue, shared between polls.
pub type CommandReceiver = Arc<Mutex<mpsc::UnboundedReceiver<CompensateCommand>>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub router: SagaRouter,
    pub registry: Arc<OmegaRegistry>,
    pub repository: Arc<InMemorySagaDataRepository>,
    pub sessions: Mutex<HashMap<ParticipantId, CommandReceiver>>,
    pub command_poll_wait: Duration,
}

impl AppState {
    pub fn new(
        router: SagaRouter,
        registry: Arc<OmegaRegistry>,
        repository: Arc<InMemorySagaDataRepository>,
        command_poll_wait: Duration,
    ) -> Self {
        Self {
            router,
            registry,
            repository,
            sessions: Mutex::new(HashMap::new()),
            command_poll_wait,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/events", post(routes::events::ingest))
        .route("/sagas", get(routes::sagas::list))
        .route("/sagas/{global_tx_id}", get(routes::sagas::get))
        .route(
            "/omegas/{service_name}/{instance_id}/commands",
            get(routes::omegas::poll_commands),
        )
        .route(
            "/omegas/{service_name}/{instance_id}",
            axum::routing::delete(routes::omegas::disconnect),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
