//! HTTP route handlers for the gemgate gateway.
//!
//! This module organizes all route handlers:
//! - `health`: Health check and metrics endpoints
//! - `generate`: Individual generation endpoints
//! - `batch`: Batch dispatch endpoint
//! - `admin`: Gate registration

pub mod admin;
pub mod batch;
pub mod generate;
pub mod health;

use axum::http::HeaderMap;
use gemgate_core::{Credential, CredentialRequest};
use tracing::warn;

use crate::error::ProxyError;
use crate::metrics::{self, RequestTimer};
use crate::state::AppState;

// Re-export handlers for convenience
pub use admin::{list_semaphores, register_semaphore};
pub use batch::batch;
pub use generate::{chat, cinematic_story_design, structured_output};
pub use health::{health, live, metrics as metrics_json, metrics_prometheus};

/// Header carrying the admin key
pub const ADMIN_HEADER: &str = "Admin-API-Key";

/// Value of the admin header, if present and valid UTF-8
pub(crate) fn admin_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok())
}

/// Resolve the credential for a call, counting failures
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    payload_key: Option<&str>,
) -> Result<Credential, ProxyError> {
    let request = CredentialRequest::new(admin_header(headers), payload_key);

    match state.resolver.resolve(&request) {
        Ok(credential) => Ok(credential),
        Err(e) => {
            warn!(error = %e, "Credential resolution failed");
            metrics::record_auth_failure(e.reason());
            state.stats.lock().await.auth_failures += 1;
            Err(e.into())
        }
    }
}

/// Open a generation request: count it and start its timer
pub(crate) async fn begin(state: &AppState, endpoint: &'static str) -> RequestTimer {
    state.stats.lock().await.requests_total += 1;
    RequestTimer::new(endpoint)
}

/// Close out a generation request: stats and request metrics
pub(crate) async fn finish<T>(
    state: &AppState,
    timer: RequestTimer,
    result: Result<T, ProxyError>,
) -> Result<T, ProxyError> {
    let mut stats = state.stats.lock().await;
    match &result {
        Ok(_) => {
            stats.requests_success += 1;
            timer.record_success();
        }
        Err(e) => {
            stats.requests_failed += 1;
            timer.record_failure(e.error_type());
        }
    }
    result
}
