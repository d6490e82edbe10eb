//! Application state for the gemgate gateway.

use std::sync::Arc;

use gemgate_core::{
    BatchDispatcher, CredentialResolver, GateRegistry, GenerativeBackend, RequestExecutor,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::ProxyError;
use crate::upstream::GeminiClient;

/// Application state shared across all handlers
pub struct AppState {
    /// Configuration
    pub config: GatewayConfig,

    /// Credential resolution chain
    pub resolver: CredentialResolver,

    /// Batch dispatcher over the gate registry
    pub dispatcher: BatchDispatcher,

    /// Runtime statistics
    pub stats: Mutex<GatewayStats>,
}

impl AppState {
    /// Create application state backed by the Gemini REST API
    pub fn new(config: GatewayConfig) -> Result<Self, ProxyError> {
        let client = GeminiClient::new(&config.gemini_base_url, config.request_timeout)?;
        Self::with_backend(config, Arc::new(client))
    }

    /// Create application state with any backend
    pub fn with_backend(
        config: GatewayConfig,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Result<Self, ProxyError> {
        let registry = Arc::new(GateRegistry::new(
            config.concurrency_limit,
            config.external_gate_capacity,
        )?);
        let executor = Arc::new(RequestExecutor::new(backend, Some(config.request_timeout)));

        info!(
            concurrency_limit = config.concurrency_limit,
            external_gate_capacity = config.external_gate_capacity,
            "Gateway state initialized"
        );

        Ok(Self {
            resolver: CredentialResolver::new(config.credential_sources()),
            dispatcher: BatchDispatcher::new(registry, executor),
            stats: Mutex::new(GatewayStats::default()),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<GateRegistry> {
        self.dispatcher.registry()
    }
}

/// Runtime statistics
#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Total generation requests received (single and batch)
    pub requests_total: u64,

    /// Requests that returned a success status
    pub requests_success: u64,

    /// Requests that returned an error status
    pub requests_failed: u64,

    /// Requests rejected during credential resolution
    pub auth_failures: u64,

    /// Batch requests received
    pub batches_total: u64,

    /// Items across all batch requests
    pub batch_items_total: u64,

    /// Admin interface calls
    pub admin_requests: u64,
}

impl GatewayStats {
    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            1.0
        } else {
            self.requests_success as f64 / self.requests_total as f64
        }
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        if self.batches_total == 0 {
            0.0
        } else {
            self.batch_items_total as f64 / self.batches_total as f64
        }
    }
}
