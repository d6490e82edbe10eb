//! Individual generation endpoints.
//!
//! Each call is dispatched as a batch of one on the default gate; the sole
//! result is unwrapped and its error, if any, becomes the HTTP status.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use gemgate_core::GenerationPayload;
use tracing::info;

use super::{authenticate, begin, finish};
use crate::error::ProxyError;
use crate::metrics;
use crate::state::AppState;
use crate::types::api::{
    ChatRequest, CinematicStoryRequest, GenerateRequest, GenerateResponse,
    StructuredOutputRequest,
};

/// Free-form chat
///
/// POST /chat
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ProxyError> {
    let timer = begin(&state, "chat").await;
    let result = match body {
        Ok(Json(request)) => generate(&state, &headers, request, GenerationPayload::Chat).await,
        Err(rejection) => Err(rejection.into()),
    };
    finish(&state, timer, result).await.map(Json)
}

/// JSON output conforming to a caller-supplied schema
///
/// POST /structured-output
pub async fn structured_output(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<StructuredOutputRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ProxyError> {
    let timer = begin(&state, "structured_output").await;
    let result = match body {
        Ok(Json(request)) => {
            generate(&state, &headers, request, GenerationPayload::StructuredOutput).await
        }
        Err(rejection) => Err(rejection.into()),
    };
    finish(&state, timer, result).await.map(Json)
}

/// Story design using the built-in schema
///
/// POST /cinematic-story-design
pub async fn cinematic_story_design(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CinematicStoryRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ProxyError> {
    let timer = begin(&state, "cinematic_story").await;
    let result = match body {
        Ok(Json(request)) => {
            generate(&state, &headers, request, GenerationPayload::CinematicStory).await
        }
        Err(rejection) => Err(rejection.into()),
    };
    finish(&state, timer, result).await.map(Json)
}

async fn generate<P>(
    state: &AppState,
    headers: &HeaderMap,
    request: GenerateRequest<P>,
    wrap: fn(P) -> GenerationPayload,
) -> Result<GenerateResponse, ProxyError> {
    let GenerateRequest { credentials, payload } = request;
    let api_key = credentials.and_then(|c| c.api_key);
    let credential = authenticate(state, headers, api_key.as_deref()).await?;

    let payload = wrap(payload);
    let kind = payload.kind();
    info!(kind = kind.as_str(), tier = credential.source_tier().as_str(), "Handling generation request");

    metrics::record_batch_size(1);
    let result = state.dispatcher.dispatch_one(payload, credential, None).await;
    let result = result.map(GenerateResponse::ok).map_err(ProxyError::from);

    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.error_type(),
    };
    metrics::record_item(kind.as_str(), status);

    result
}
