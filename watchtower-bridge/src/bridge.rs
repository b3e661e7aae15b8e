//! Composition root and the operation surface offered to the presentation
//! layer.
//!
//! One [`Bridge`] is built at startup and shared by reference. It owns the
//! current configuration, the connection manager, the poll scheduler and the
//! pump that feeds transport events back into the manager.

use crate::config::{dedup_names, ConfigStore, MonitorConfig};
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::error::{BridgeError, Result};
use crate::fanout::StatusFanout;
use crate::metrics::HostMetricsProvider;
use crate::observation::{BridgeEvent, Status, StatusKind};
use crate::probes::{process_state_label, LivenessProbe, ServiceReport, ServiceState};
use crate::publisher::Publisher;
use crate::scheduler::{refresh_tick, MetricToggles, PollContext, PollScheduler};
use crate::transport::{TaggedEvent, TransportFactory};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result of an on-demand process check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessCheck {
    pub name: String,
    pub status: String,
}

/// Result of an on-demand service check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigUpdate {
    /// False when the config was only saved (broker not reachable yet).
    pub published: bool,
}

pub struct Bridge {
    store: Arc<dyn ConfigStore>,
    config: Mutex<Option<MonitorConfig>>,
    /// Serializes config application so connection and scheduler always
    /// follow the same document.
    updating: Mutex<()>,
    connection: ConnectionManager,
    scheduler: Mutex<PollScheduler>,
    ctx: PollContext,
    fanout: StatusFanout,
    events: Mutex<Option<mpsc::UnboundedReceiver<TaggedEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Bridge {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn TransportFactory>,
        probe: Arc<dyn LivenessProbe>,
        metrics: Arc<dyn HostMetricsProvider>,
    ) -> Self {
        let fanout = StatusFanout::new();
        let (connection, events) = ConnectionManager::new(factory, fanout.clone());
        let ctx = PollContext {
            probe,
            metrics,
            publisher: Publisher::new(connection.clone()),
            fanout: fanout.clone(),
        };
        Self {
            store,
            config: Mutex::new(None),
            updating: Mutex::new(()),
            connection,
            scheduler: Mutex::new(PollScheduler::new()),
            ctx,
            fanout,
            events: Mutex::new(Some(events)),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Loads the stored config and brings everything up. Must run inside a
    /// Tokio runtime; calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut events) = self.events.lock().take() else {
            return;
        };

        let connection = self.connection.clone();
        *self.pump.lock() = Some(tokio::spawn(async move {
            while let Some(tagged) = events.recv().await {
                connection.handle_event(tagged);
            }
        }));

        let stored = self.store.load();
        match &stored {
            Some(_) => info!("Loaded stored configuration"),
            None => info!("No stored configuration, waiting for one"),
        }
        let config = stored.clone().unwrap_or_default();
        let _updating = self.updating.lock();
        *self.config.lock() = stored;
        self.apply(&config);
        self.scheduler
            .lock()
            .start_heartbeat(self.connection.clone());
    }

    fn apply(&self, config: &MonitorConfig) {
        self.connection.reconfigure(config);
        self.scheduler.lock().rebuild(config, &self.ctx);
    }

    pub fn config(&self) -> Option<MonitorConfig> {
        self.config.lock().clone()
    }

    /// Saves, reconnects, reschedules, announces, then notifies.
    pub fn update_config(&self, config: MonitorConfig) -> Result<ConfigUpdate> {
        let json = serde_json::to_string(&config)?;
        let _updating = self.updating.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ShutDown);
        }
        self.store.save(&config)?;
        *self.config.lock() = Some(config.clone());

        self.apply(&config);

        let published = self.ctx.publisher.config(&json);
        if !published && config.is_configured() {
            self.connection.announce_on_connect(json);
        }

        let state = if published { "published" } else { "saved" };
        info!("Configuration updated ({})", state);
        self.fanout
            .status(Status::new(StatusKind::Config, "update", state));
        self.fanout.config_changed();
        Ok(ConfigUpdate { published })
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Rebuilds the client from the current configuration. A config still
    /// waiting to be announced is announced by the new client.
    pub fn reconnect(&self) {
        let _updating = self.updating.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let config = self.config().unwrap_or_default();
        self.connection.reconnect(&config);
    }

    /// Emits one-decimal system statuses right now.
    pub async fn refresh_metrics(&self) {
        let toggles = MetricToggles::from(&self.config().unwrap_or_default());
        refresh_tick(&self.ctx, toggles).await;
    }

    pub async fn check_processes(&self, names: &[String]) -> Vec<ProcessCheck> {
        let mut results = Vec::new();
        for name in dedup_names(names) {
            match self.ctx.probe.check_process(&name).await {
                Ok(running) => results.push(ProcessCheck {
                    status: process_state_label(running).to_string(),
                    name,
                }),
                Err(e) => warn!("Process check for {} failed: {}", name, e),
            }
        }
        results
    }

    pub async fn check_services(&self, names: &[String]) -> Vec<ServiceCheck> {
        let mut results = Vec::new();
        for name in dedup_names(names) {
            let report = match self.ctx.probe.check_service(&name).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Service check for {} failed: {}", name, e);
                    ServiceReport::bare(ServiceState::Error)
                }
            };
            results.push(ServiceCheck {
                name,
                status: report.state.as_str().to_string(),
                display_name: report.display_name,
                description: report.description,
            });
        }
        results
    }

    /// Opens a metrics/status stream; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.fanout.subscribe()
    }

    /// Force-closes the broker connection and stops every timer.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _updating = self.updating.lock();
        info!("Shutting down bridge");
        self.scheduler.lock().shutdown();
        self.connection.shutdown();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }

    pub fn active_tasks(&self) -> Vec<&'static str> {
        self.scheduler.lock().active()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
