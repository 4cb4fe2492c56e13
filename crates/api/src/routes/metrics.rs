//! Prometheus exposition of the coordinator metrics.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: saga, compensation and gateway counters in text format.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    // Drains histogram buckets so saga_duration_seconds stays bounded
    handle.run_upkeep();
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}
