//! jsbridge server binary
//!
//! Loads configuration, wires the bridge core into the HTTP router, and
//! serves until interrupted.

use anyhow::Result;
use clap::Parser;
use jsbridge::{server, Bridge, BridgeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jsbridge")]
#[command(version)]
#[command(about = "Reverse-RPC bridge between HTTP callers and browser-side agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "JSBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address override (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("jsbridge={},tower_http=debug", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        BridgeConfig::load(config_path)?
    } else {
        BridgeConfig::default()
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let bridge = Arc::new(Bridge::new(&config));
    let app = server::router(bridge, &config);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    tracing::info!(
        listen = %config.server.listen,
        cors = config.server.cors,
        default_timeout_secs = config.rpc.default_timeout_secs,
        "jsbridge is running"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("jsbridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    } else {
        tracing::info!("shutdown signal received");
    }
}
