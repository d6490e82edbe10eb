//! Batch dispatch endpoint.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use gemgate_core::BatchOutcome;
use tracing::{info, warn};

use super::{authenticate, begin, finish};
use crate::error::ProxyError;
use crate::metrics;
use crate::state::AppState;
use crate::types::api::BatchRequest;

/// Run a batch of sub-requests concurrently under one gate
///
/// POST /batch
///
/// The response status reflects the batch as a whole; individual failures
/// are reported inside `results`.
pub async fn batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchOutcome>, ProxyError> {
    let timer = begin(&state, "batch").await;
    let result = match body {
        Ok(Json(request)) => run_batch(&state, &headers, request).await,
        Err(rejection) => Err(rejection.into()),
    };
    finish(&state, timer, result).await.map(Json)
}

async fn run_batch(
    state: &AppState,
    headers: &HeaderMap,
    request: BatchRequest,
) -> Result<BatchOutcome, ProxyError> {
    let credential = authenticate(state, headers, request.api_key()).await?;

    let size = request.requests.len();
    let limit = state.config.max_batch_size;
    if size > limit {
        warn!(size, limit, "Batch rejected: too many requests");
        return Err(ProxyError::InvalidRequest(format!(
            "Batch contains {} requests; the limit is {}",
            size, limit
        )));
    }

    let gate_id = request.external_semaphore_id.clone();
    let items = request.decode_items();
    let kinds: Vec<&'static str> = items
        .iter()
        .map(|item| item.as_ref().map_or("unknown", |payload| payload.kind().as_str()))
        .collect();

    info!(
        size,
        gate = gate_id.as_deref().unwrap_or("default"),
        tier = credential.source_tier().as_str(),
        "Handling batch request"
    );

    metrics::record_batch_size(size);
    {
        let mut stats = state.stats.lock().await;
        stats.batches_total += 1;
        stats.batch_items_total += size as u64;
    }

    let outcome = state.dispatcher.dispatch_items(items, credential, gate_id.as_deref()).await?;

    for record in &outcome.results {
        let kind = kinds.get(record.index).copied().unwrap_or("unknown");
        metrics::record_item(kind, metrics::record_status(record));
    }

    Ok(outcome)
}
