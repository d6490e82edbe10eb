//! Error types for the gemgate HTTP layer.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gemgate_core::{CredentialError, DispatchError, ErrorInfo, ErrorKind, GateError};
use serde_json::json;

/// Gateway error types
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No usable credential, or a bad admin key on an admin route
    #[error("{0}")]
    Unauthorized(String),

    /// Admin authenticated but the server has no Gemini key
    #[error("{0}")]
    AdminKeyUnavailable(String),

    /// Request parsing or validation error
    #[error("{0}")]
    InvalidRequest(String),

    /// Gemini failed or answered with something unusable
    #[error("{0}")]
    Backend(String),

    /// Gemini did not answer in time
    #[error("{0}")]
    Timeout(String),

    /// Bad gate id or capacity
    #[error("Gate misconfiguration: {0}")]
    GateMisconfiguration(GateError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::AdminKeyUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Backend(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::GateMisconfiguration(GateError::Closed { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::GateMisconfiguration(GateError::CapacityConflict { .. }) => {
                StatusCode::CONFLICT
            }
            ProxyError::GateMisconfiguration(_) => StatusCode::BAD_REQUEST,
            ProxyError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable error type
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Unauthorized(_) => ErrorKind::Unauthorized.as_str(),
            ProxyError::AdminKeyUnavailable(_) => "admin_key_unavailable",
            ProxyError::InvalidRequest(_) => ErrorKind::InvalidRequest.as_str(),
            ProxyError::Backend(_) | ProxyError::Http(_) => ErrorKind::BackendError.as_str(),
            ProxyError::Timeout(_) => ErrorKind::Timeout.as_str(),
            ProxyError::GateMisconfiguration(_) => "gate_misconfiguration",
        }
    }
}

impl From<CredentialError> for ProxyError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Unauthorized => ProxyError::Unauthorized(err.to_string()),
            CredentialError::AdminKeyUnavailable => ProxyError::AdminKeyUnavailable(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ProxyError {
    fn from(rejection: JsonRejection) -> Self {
        ProxyError::InvalidRequest(rejection.body_text())
    }
}

impl From<GateError> for ProxyError {
    fn from(err: GateError) -> Self {
        ProxyError::GateMisconfiguration(err)
    }
}

impl From<ErrorInfo> for ProxyError {
    fn from(info: ErrorInfo) -> Self {
        match info.kind {
            ErrorKind::Unauthorized => ProxyError::Unauthorized(info.message),
            ErrorKind::InvalidRequest => ProxyError::InvalidRequest(info.message),
            ErrorKind::BackendError => ProxyError::Backend(info.message),
            ErrorKind::Timeout => ProxyError::Timeout(info.message),
        }
    }
}

impl From<DispatchError> for ProxyError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Gate(e) => e.into(),
            DispatchError::Item(info) => info.into(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));

        (self.status(), body).into_response()
    }
}
