//! Watchtower Bridge console runner
//!
//! Runs the bridge against the local host and the configured broker, with
//! the log as the presentation surface. Ctrl-C tears everything down.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watchtower_bridge::{
    Bridge, BridgeEvent, FileConfigStore, RumqttFactory, SysinfoMetrics, SystemProbe,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("watchtower_bridge=info")),
        )
        .init();

    info!("Watchtower Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let store = FileConfigStore::from_env().context("Failed to locate config file")?;
    info!("Using configuration at {}", store.path().display());

    let bridge = Bridge::new(
        Arc::new(store),
        Arc::new(RumqttFactory),
        Arc::new(SystemProbe),
        Arc::new(SysinfoMetrics),
    );

    let mut events = bridge.subscribe();
    let presenter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::Status(status)) => {
                    info!("[status] {} {} = {}", status.kind.as_str(), status.name, status.state)
                }
                Ok(BridgeEvent::Metrics(metric)) => {
                    info!("[metrics] {} = {}", metric.topic, metric.value)
                }
                Ok(BridgeEvent::ConfigChanged) => info!("[config] changed"),
                Err(RecvError::Lagged(skipped)) => warn!("Presenter lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    bridge.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    bridge.shutdown();
    presenter.abort();
    info!("Watchtower Bridge stopped");
    Ok(())
}
