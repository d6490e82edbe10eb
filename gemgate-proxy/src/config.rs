//! Gateway configuration, read once from the environment at start-up.

use std::str::FromStr;
use std::time::Duration;

use gemgate_core::CredentialSources;

/// Default listen port
pub const DEFAULT_PORT: u16 = 5004;

/// Default capacity of the default gate
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 15;

/// Default Gemini REST endpoint
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default per-call timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default ceiling on items per batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Port to listen on
    pub port: u16,

    /// Key expected in the `Admin-API-Key` header
    pub admin_api_key: Option<String>,

    /// Server's own Gemini key, used for admin callers
    pub server_api_key: Option<String>,

    /// Gemini key used when the caller brings none
    pub fallback_api_key: Option<String>,

    /// Capacity of the default gate
    pub concurrency_limit: usize,

    /// Capacity given to named gates created on first reference
    pub external_gate_capacity: usize,

    /// Gemini base URL
    pub gemini_base_url: String,

    /// Timeout for one backend call
    pub request_timeout: Duration,

    /// Maximum number of items accepted in one batch
    pub max_batch_size: usize,

    /// Whether to print the banner on startup
    pub print_banner: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            admin_api_key: None,
            server_api_key: None,
            fallback_api_key: None,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            external_gate_capacity: DEFAULT_CONCURRENCY_LIMIT,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            print_banner: true,
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from any variable source. Unparseable numbers fall back
    /// to defaults; empty keys count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let concurrency_limit =
            parse_var(&lookup, "GEMINI_CONCURRENCY_LIMIT").unwrap_or(defaults.concurrency_limit);

        Self {
            port: parse_var(&lookup, "GEMGATE_PORT").unwrap_or(defaults.port),
            admin_api_key: secret_var(&lookup, "ADMIN_API_KEY"),
            server_api_key: secret_var(&lookup, "GEMINI_API_KEY"),
            fallback_api_key: secret_var(&lookup, "GEMINI_FALLBACK_API_KEY"),
            concurrency_limit,
            external_gate_capacity: parse_var(&lookup, "GEMGATE_EXTERNAL_GATE_CAPACITY")
                .unwrap_or(concurrency_limit),
            gemini_base_url: lookup("GEMINI_BASE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.gemini_base_url),
            request_timeout: parse_var(&lookup, "GEMINI_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_batch_size: parse_var(&lookup, "GEMGATE_MAX_BATCH_SIZE")
                .unwrap_or(defaults.max_batch_size),
            print_banner: defaults.print_banner,
        }
    }

    /// Keys handed to the credential resolver
    pub fn credential_sources(&self) -> CredentialSources {
        CredentialSources {
            admin_key: self.admin_api_key.clone(),
            server_key: self.server_api_key.clone(),
            env_key: self.fallback_api_key.clone(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("admin_api_key", &self.admin_api_key.is_some())
            .field("server_api_key", &self.server_api_key.is_some())
            .field("fallback_api_key", &self.fallback_api_key.is_some())
            .field("concurrency_limit", &self.concurrency_limit)
            .field("external_gate_capacity", &self.external_gate_capacity)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("request_timeout", &self.request_timeout)
            .field("max_batch_size", &self.max_batch_size)
            .field("print_banner", &self.print_banner)
            .finish()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|s| s.trim().parse().ok())
}

fn secret_var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
