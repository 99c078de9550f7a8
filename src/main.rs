//! # Edge Gateway - Main Entry Point
//!
//! Loads configuration (`GATEWAY_CONFIG_PATH`, or the built-in tables plus environment
//! overrides), initializes logging and the Prometheus recorder, and serves until SIGINT
//! or SIGTERM.

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing::{error, info, warn};

use edge_gateway::observability::logging::initialize_subscriber;
use edge_gateway::{GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;

    initialize_subscriber(&config.observability.logging)
        .context("Failed to initialize logging")?;

    info!("🚀 Starting Edge Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let metrics = install_metrics_recorder();

    let server = GatewayServer::new(&config, metrics).context("Failed to build gateway")?;
    info!(
        bind_addr = %server.bind_addr(),
        environment = ?config.server.environment,
        "📋 Configuration loaded"
    );

    server
        .run(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    info!("✅ Edge Gateway shutdown complete");
    Ok(())
}

/// Configuration file if `GATEWAY_CONFIG_PATH` is set, built-in defaults otherwise
async fn load_config() -> anyhow::Result<GatewayConfig> {
    match std::env::var("GATEWAY_CONFIG_PATH") {
        Ok(path) => GatewayConfig::load_from_file(&path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path)),
        Err(_) => GatewayConfig::from_env().context("Invalid configuration"),
    }
}

/// Install the global Prometheus recorder; the gateway still runs without one
fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("📊 Metrics recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Failed to install metrics recorder, /metrics disabled: {}", e);
            None
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
