//! Gate administration.
//!
//! Both routes require the `Admin-API-Key` header. No backend key is
//! needed, so they work on a server without `GEMINI_API_KEY`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use tracing::{info, warn};

use super::admin_header;
use crate::error::ProxyError;
use crate::metrics;
use crate::state::AppState;
use crate::types::api::{GatesResponse, RegisterGateRequest};

/// Register a named gate with an explicit capacity
///
/// POST /admin/semaphores
pub async fn register_semaphore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<RegisterGateRequest>, JsonRejection>,
) -> Result<Json<GatesResponse>, ProxyError> {
    require_admin(&state, &headers).await?;
    let Json(request) = body?;

    let capacity = request.capacity()?;
    state.registry().register(&request.semaphore_id, capacity)?;
    info!(gate = %request.semaphore_id, capacity, "Gate registered via admin API");

    Ok(Json(GatesResponse::from_snapshot(state.registry().snapshot())))
}

/// List every gate with its capacity and held permits
///
/// GET /admin/semaphores
pub async fn list_semaphores(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<GatesResponse>, ProxyError> {
    require_admin(&state, &headers).await?;
    Ok(Json(GatesResponse::from_snapshot(state.registry().snapshot())))
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ProxyError> {
    state.stats.lock().await.admin_requests += 1;

    if state.resolver.authenticate_admin(admin_header(headers)) {
        return Ok(());
    }

    warn!("Admin request rejected");
    metrics::record_auth_failure("admin");
    state.stats.lock().await.auth_failures += 1;
    Err(ProxyError::Unauthorized("Invalid or missing Admin-API-Key header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::routes::ADMIN_HEADER;
    use async_trait::async_trait;
    use axum::http::{HeaderValue, StatusCode};
    use gemgate_core::{
        BackendError, Credential, GenerationCall, GenerationOutput, GenerativeBackend,
    };

    struct NoopBackend;

    #[async_trait]
    impl GenerativeBackend for NoopBackend {
        async fn generate(
            &self,
            _credential: &Credential,
            _call: &GenerationCall,
        ) -> Result<GenerationOutput, BackendError> {
            Ok(GenerationOutput::Text(String::new()))
        }
    }

    fn state() -> Arc<AppState> {
        let config = GatewayConfig { admin_api_key: Some("admin".into()), ..Default::default() };
        Arc::new(AppState::with_backend(config, Arc::new(NoopBackend)).unwrap())
    }

    fn admin_headers(key: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_HEADER, HeaderValue::from_static(key));
        headers
    }

    fn register(id: &str, limit: i64) -> Result<Json<RegisterGateRequest>, JsonRejection> {
        Ok(Json(RegisterGateRequest { semaphore_id: id.to_string(), limit }))
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let state = state();

        let Json(response) =
            register_semaphore(State(state.clone()), admin_headers("admin"), register("tenant-a", 3))
                .await
                .unwrap();
        assert_eq!(response.semaphores["tenant-a"].capacity, 3);

        let Json(listed) = list_semaphores(State(state.clone()), admin_headers("admin")).await.unwrap();
        assert_eq!(listed.semaphores.len(), 2);
        assert_eq!(listed.semaphores["default"].capacity, 15);
        assert_eq!(state.stats.lock().await.admin_requests, 2);
    }

    #[tokio::test]
    async fn test_wrong_admin_key_is_rejected() {
        let state = state();

        let err = list_semaphores(State(state.clone()), admin_headers("nope")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = list_semaphores(State(state.clone()), HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.stats.lock().await.auth_failures, 2);
    }

    #[tokio::test]
    async fn test_capacity_conflict() {
        let state = state();

        register_semaphore(State(state.clone()), admin_headers("admin"), register("tenant-a", 3))
            .await
            .unwrap();
        register_semaphore(State(state.clone()), admin_headers("admin"), register("tenant-a", 3))
            .await
            .unwrap();

        let err =
            register_semaphore(State(state.clone()), admin_headers("admin"), register("tenant-a", 4))
                .await
                .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_gate_misconfiguration() {
        let state = state();

        for body in [
            r#"{"semaphore_id": "tenant-c", "limit": -1}"#,
            r#"{"semaphore_id": "tenant-c", "limit": 0}"#,
        ] {
            let request = Json::<RegisterGateRequest>::from_bytes(body.as_bytes());

            let err = register_semaphore(State(state.clone()), admin_headers("admin"), request)
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.error_type(), "gate_misconfiguration");
        }

        assert!(!state.registry().snapshot().contains_key("tenant-c"));
    }

    #[tokio::test]
    async fn test_invalid_registration() {
        let state = state();

        let err = register_semaphore(State(state.clone()), admin_headers("admin"), register("", 3))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = register_semaphore(State(state), admin_headers("admin"), register("tenant-b", 0))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
