//! gemgate proxy - concurrency-gated gateway for the Gemini API.
//!
//! ## Quick Start
//!
//! ```bash
//! # Start with defaults (port 5004, 15 concurrent Gemini calls)
//! GEMINI_FALLBACK_API_KEY=... gemgate-proxy
//!
//! # Custom configuration
//! GEMGATE_PORT=9000 GEMINI_CONCURRENCY_LIMIT=4 gemgate-proxy
//! ```

use gemgate_proxy::{run_server, GatewayConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("gemgate_proxy=info,gemgate_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    run_server(GatewayConfig::from_env()).await
}
