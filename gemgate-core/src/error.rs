//! Error types for the gemgate core library
//!
//! This module provides structured error types using `thiserror` for
//! type-safe error handling across the library.
//!
//! # Error Hierarchy
//!
//! ```text
//! CredentialError  - No credential tier resolved (fails the whole call)
//! GateError        - Gate misconfiguration (invalid id or capacity)
//! BackendError     - One backend invocation failed
//! DispatchError    - Single-item dispatch surfaced as a direct failure
//! ErrorInfo        - Per-item failure carried as data inside a ResultRecord
//! ```
//!
//! Only `CredentialError` and `GateError` abort a call. Once a batch is
//! running, every failure is captured per item as an [`ErrorInfo`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::gate::MAX_GATE_CAPACITY;

/// Classification of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing credential detected late by the backend
    Unauthorized,
    /// Malformed payload or schema, or a missing required field
    InvalidRequest,
    /// The backend itself reported a failure
    BackendError,
    /// The backend call did not complete in time
    Timeout,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure recorded against one sub-request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// Errors that can occur while resolving the credential for a call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No tier produced a credential
    #[error(
        "Authentication failed. Provide 'Admin-API-Key' in headers or \
         'credentials.api_key' in payload."
    )]
    Unauthorized,

    /// The admin key matched but the server has no key of its own to lend
    #[error("Admin authenticated, but the service is not configured with a GEMINI_API_KEY.")]
    AdminKeyUnavailable,
}

impl CredentialError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            CredentialError::Unauthorized => "unauthorized",
            CredentialError::AdminKeyUnavailable => "admin_key_unavailable",
        }
    }
}

/// Errors raised by gate registration and resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Capacity outside `1..=MAX_GATE_CAPACITY`
    #[error(
        "Gate '{id}' has invalid capacity {capacity}: must be between 1 and {max}",
        max = MAX_GATE_CAPACITY
    )]
    InvalidCapacity { id: String, capacity: i64 },

    /// A registered gate was re-registered with a different capacity
    #[error("Gate '{id}' is already registered with capacity {registered}, refusing {requested}")]
    CapacityConflict {
        id: String,
        registered: usize,
        requested: usize,
    },

    /// Gate ids must be non-empty
    #[error("Gate id must not be empty")]
    EmptyId,

    /// The underlying semaphore was closed
    #[error("Gate '{id}' is closed")]
    Closed { id: String },
}

impl GateError {
    /// Create an invalid capacity error
    pub fn invalid_capacity<C: TryInto<i64>>(id: impl Into<String>, capacity: C) -> Self {
        Self::InvalidCapacity { id: id.into(), capacity: capacity.try_into().unwrap_or(i64::MAX) }
    }
}

/// Errors reported by a generative backend for a single call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected the credential
    #[error("Backend rejected credential: {0}")]
    Unauthorized(String),

    /// The backend rejected the request shape
    #[error("Backend rejected request: {0}")]
    InvalidRequest(String),

    /// Transport failure, server error or unusable output
    #[error("Backend error: {0}")]
    Upstream(String),

    /// The call exceeded its deadline
    #[error("Backend call timed out: {0}")]
    Timeout(String),
}

impl BackendError {
    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// The per-item classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unauthorized(_) => ErrorKind::Unauthorized,
            BackendError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BackendError::Upstream(_) => ErrorKind::BackendError,
            BackendError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

impl From<BackendError> for ErrorInfo {
    fn from(err: BackendError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// Failure of a single-item dispatch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The requested gate could not be resolved
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The sole item failed
    #[error("{0}")]
    Item(ErrorInfo),
}
