//! Health check and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::metrics as prom;
use crate::state::AppState;
use crate::types::api::GatesResponse;

/// Status summary
///
/// GET / and GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources = state.resolver.sources();

    Json(json!({
        "status": "ok",
        "service": "gemgate",
        "version": env!("CARGO_PKG_VERSION"),
        "concurrency_limit": state.config.concurrency_limit,
        "admin_key_configured": sources.admin_configured(),
        "server_key_configured": sources.server_configured(),
        "env_key_configured": sources.env_configured()
    }))
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

/// Metrics endpoint with gateway, dispatch and gate statistics
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.stats.lock().await;
    let dispatch = state.dispatcher.metrics().snapshot();
    let gates = GatesResponse::from_snapshot(state.registry().snapshot());

    Json(json!({
        "gateway": {
            "requests_total": stats.requests_total,
            "requests_success": stats.requests_success,
            "requests_failed": stats.requests_failed,
            "success_rate": stats.success_rate(),
            "auth_failures": stats.auth_failures,
            "batches_total": stats.batches_total,
            "batch_items_total": stats.batch_items_total,
            "avg_batch_size": stats.avg_batch_size(),
            "admin_requests": stats.admin_requests
        },
        "dispatch": dispatch,
        "gates": gates.semaphores,
        "config": {
            "concurrency_limit": state.config.concurrency_limit,
            "external_gate_capacity": state.config.external_gate_capacity,
            "request_timeout_secs": state.config.request_timeout.as_secs(),
            "max_batch_size": state.config.max_batch_size
        }
    }))
}

/// Prometheus text exposition
///
/// GET /metrics/prometheus
///
/// Gauges derived from live state are refreshed on every scrape.
pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dispatch = state.dispatcher.metrics();
    prom::set_item_gauges(dispatch.in_flight(), dispatch.waiting());
    prom::set_gate_gauges(&state.registry().snapshot());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        prom::encode_metrics(),
    )
}
