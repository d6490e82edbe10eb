use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gemgate_proxy::config::DEFAULT_PORT;
use gemgate_proxy::routes::ADMIN_HEADER;
use gemgate_proxy::{run_server, GatewayConfig};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_URL: &str = "http://localhost:5004";

#[derive(Parser, Debug)]
#[command(name = "gemgate")]
#[command(version)]
#[command(about = "gemgate - concurrency-gated gateway for the Gemini API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "GEMGATE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Capacity of the default gate
        #[arg(short = 'c', long)]
        concurrency_limit: Option<usize>,

        /// Skip the startup banner
        #[arg(long)]
        no_banner: bool,
    },

    /// Show the status summary of a running gateway
    Status {
        /// Gateway base URL
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },

    /// Register a named gate on a running gateway
    RegisterGate {
        /// Gate id (the batch `external_semaphore_id`)
        #[arg(long)]
        id: String,

        /// Number of concurrent calls the gate admits
        #[arg(long)]
        limit: usize,

        /// Admin key
        #[arg(long, env = "ADMIN_API_KEY", hide_env_values = true)]
        admin_key: String,

        /// Gateway base URL
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, concurrency_limit, no_banner } => {
            init_tracing();

            let config = serve_config(
                |name| std::env::var(name).ok(),
                port,
                concurrency_limit,
                no_banner,
            );

            run_server(config).await?;
        }

        Commands::Status { url } => {
            let body: Value = client()?
                .get(format!("{}/health", url.trim_end_matches('/')))
                .send()
                .await
                .with_context(|| format!("could not reach gemgate at {}", url))?
                .error_for_status()?
                .json()
                .await?;

            println!("=== gemgate at {} ===", url);
            println!("Status: {}", field(&body, "status"));
            println!("Version: {}", field(&body, "version"));
            println!("Concurrency limit: {}", field(&body, "concurrency_limit"));
            println!("Admin key configured: {}", field(&body, "admin_key_configured"));
            println!("Server key configured: {}", field(&body, "server_key_configured"));
            println!("Fallback key configured: {}", field(&body, "env_key_configured"));
        }

        Commands::RegisterGate { id, limit, admin_key, url } => {
            let response = client()?
                .post(format!("{}/admin/semaphores", url.trim_end_matches('/')))
                .header(ADMIN_HEADER, admin_key)
                .json(&json!({"semaphore_id": id, "limit": limit}))
                .send()
                .await
                .with_context(|| format!("could not reach gemgate at {}", url))?;

            let status = response.status();
            let body: Value = response.json().await?;
            if !status.is_success() {
                anyhow::bail!("registration failed ({}): {}", status, error_message(&body));
            }

            println!("Gate '{}' registered with limit {}\n", id, limit);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("gemgate_proxy=info,gemgate_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

/// `-c` stands in for `GEMINI_CONCURRENCY_LIMIT`, so named gates follow it
/// unless `GEMGATE_EXTERNAL_GATE_CAPACITY` is set
fn serve_config<F>(
    lookup: F,
    port: u16,
    concurrency_limit: Option<usize>,
    no_banner: bool,
) -> GatewayConfig
where
    F: Fn(&str) -> Option<String>,
{
    let limit = concurrency_limit.map(|limit| limit.to_string());
    let mut config = GatewayConfig::from_lookup(|name| match (name, &limit) {
        ("GEMINI_CONCURRENCY_LIMIT", Some(limit)) => Some(limit.clone()),
        _ => lookup(name),
    });
    config.port = port;
    config.print_banner = !no_banner;
    config
}

fn client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?)
}

fn field(body: &Value, key: &str) -> String {
    match body.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
