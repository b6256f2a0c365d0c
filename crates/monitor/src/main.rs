//! Kube Monitor - headless Kubernetes cluster monitor
//!
//! Keeps a cluster snapshot warm and serves it over HTTP alongside
//! health and Prometheus endpoints.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console_lib::{health::components, Console};
use kube_monitor::{api, config::MonitorConfig};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kube-monitor");

    let config = MonitorConfig::parse();
    let settings = config.settings()?;
    info!(
        namespace = %settings.namespace,
        refresh_interval_secs = settings.refresh_interval_secs,
        "Monitor configured"
    );

    let console = Arc::new(
        Console::connect(&settings)
            .await
            .context("Failed to connect to cluster")?,
    );

    let health = console.health();
    health.register(components::API_SERVER).await;
    health.register(components::REFRESHER).await;
    if settings.node_metrics {
        health.register(components::KUBELET_METRICS).await;
    }
    if settings.accelerator.is_enabled() {
        health.register(components::ACCELERATOR_EXPORTER).await;
    }

    console.start().await?;

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let state = Arc::new(api::AppState::new(console.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, state, async move {
        let _ = shutdown_rx.recv().await;
    }));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }
    console.shutdown().await;

    Ok(())
}
