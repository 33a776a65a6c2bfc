//! TG Token Relay - CLI Application
//!
//! A minimal relay service with:
//! - Credential table loaded from a remote env-file document
//! - Token fetch and search forwarding endpoints
//! - Prometheus metrics

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tg_token_relay::{
    build_router, config, health::HealthChecker, metrics::RelayMetrics, relay::RelayService,
    AppState,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// TG Token Relay - a minimal relay for the token and search upstreams
#[derive(Parser)]
#[command(name = "tg-token-relay")]
#[command(version, about = "A minimal relay for the TG token and search upstreams", long_about = None)]
struct Cli {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind to
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// URL of the remote config document (overrides the CONFIG_FILE_URL env var)
    #[arg(long)]
    config_url: Option<String>,
    /// Timeout in seconds applied to all outbound calls
    #[arg(long, default_value_t = 30)]
    upstream_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cli.upstream_timeout))
        .build()?;

    // One-shot configuration load; any failure leaves the service running
    // unconfigured rather than crashing it.
    let config_url = cli
        .config_url
        .or_else(|| std::env::var(config::CONFIG_FILE_URL).ok());
    let snapshot = match config::load_remote_config(config_url.as_deref(), &client).await {
        Ok(snapshot) => {
            info!("Loaded {} credential records", snapshot.credentials.len());
            Some(Arc::new(snapshot))
        }
        Err(err) => {
            error!("{err}");
            None
        }
    };

    let metrics = Arc::new(RelayMetrics::new());
    let health = Arc::new(HealthChecker::new());
    let relay = Arc::new(RelayService::new(client, snapshot, metrics.clone()));
    if !relay.is_configured() {
        error!("Starting unconfigured; token and search requests will be rejected");
    }

    let state = AppState {
        relay,
        metrics,
        health,
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting relay server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
