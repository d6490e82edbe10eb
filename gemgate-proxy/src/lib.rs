//! gemgate proxy library
//!
//! HTTP gateway in front of the Gemini generative API. Calls are admitted
//! through bounded concurrency gates, credentials are resolved per call, and
//! batches fan out concurrently while keeping their input order.
//!
//! This library can be used either as a standalone binary or embedded in
//! the `gemgate` CLI.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod types;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::ProxyError;
pub use state::{AppState, GatewayStats};
pub use upstream::GeminiClient;

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the gateway router over shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/", get(routes::health))
        .route("/health", get(routes::health))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics_json))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Generation endpoints
        .route("/chat", post(routes::chat))
        .route("/structured-output", post(routes::structured_output))
        .route("/cinematic-story-design", post(routes::cinematic_story_design))
        .route("/batch", post(routes::batch))
        // Admin endpoints
        .route(
            "/admin/semaphores",
            get(routes::list_semaphores).post(routes::register_semaphore),
        )
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gemgate server.
///
/// This function starts the HTTP server and blocks until it's shut down.
///
/// # Example
/// ```no_run
/// use gemgate_proxy::{run_server, GatewayConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = GatewayConfig { port: 5004, ..GatewayConfig::from_env() };
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    init_metrics();

    info!(
        port = config.port,
        concurrency_limit = config.concurrency_limit,
        gemini_base_url = %config.gemini_base_url,
        "Starting gemgate v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone())?);

    let sources = state.resolver.sources();
    if !sources.server_configured() && !sources.env_configured() {
        warn!("No GEMINI_API_KEY or GEMINI_FALLBACK_API_KEY set; callers must bring their own key");
    }
    if sources.admin_configured() && !sources.server_configured() {
        warn!("ADMIN_API_KEY is set without GEMINI_API_KEY; admin generation calls will fail");
    }

    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("gemgate listening on http://{}", addr);
    info!("Health:     http://{}/health", addr);

    if config.print_banner {
        print_banner(&config, &state);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Print the startup banner
fn print_banner(config: &GatewayConfig, state: &AppState) {
    let addr = format!("0.0.0.0:{}", config.port);
    let sources = state.resolver.sources();
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };

    println!();
    println!("==================================================");
    println!("  gemgate v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://{}", addr);
    println!("  Gemini backend: {}", config.gemini_base_url);
    println!();
    println!("  Gates:");
    println!("    Default capacity: {}", config.concurrency_limit);
    println!("    External gate capacity: {}", config.external_gate_capacity);
    println!("    Max batch size: {}", config.max_batch_size);
    println!("    Call timeout: {}s", config.request_timeout.as_secs());
    println!();
    println!("  Credentials:");
    println!("    Admin key: {}", yes_no(sources.admin_configured()));
    println!("    Server key: {}", yes_no(sources.server_configured()));
    println!("    Fallback key: {}", yes_no(sources.env_configured()));
    println!();
    println!("  Endpoints:");
    println!("    Generate: POST /chat, /structured-output, /cinematic-story-design");
    println!("    Batch:    POST /batch");
    println!("    Admin:    GET|POST /admin/semaphores");
    println!("    Health:   GET  /health, /live, /metrics");
    println!("    Prometheus: GET /metrics/prometheus");
    println!("==================================================");
    println!();
}
