//! Poll scheduler
//!
//! Four independent repeating tasks:
//!
//! | task      | cadence                       | runs when                  |
//! |-----------|-------------------------------|----------------------------|
//! | process   | 5s                            | `process_check` non-empty  |
//! | service   | `status_update_interval`      | `service_check` non-empty  |
//! | system    | 30s                           | always                     |
//! | heartbeat | 5s                            | from start until shutdown  |
//!
//! The first three are rebuilt from every new configuration. Each lives in a
//! [`ScheduledTask`] whose drop aborts it, so replacing the set can never
//! leave two timers for the same job.

use crate::config::MonitorConfig;
use crate::connection::ConnectionManager;
use crate::fanout::StatusFanout;
use crate::metrics::{one_decimal_percent, whole_percent, HostMetricsProvider};
use crate::observation::{Metric, Status, StatusKind};
use crate::probes::{process_state_label, LivenessProbe};
use crate::publisher::Publisher;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const PROCESS_INTERVAL: Duration = Duration::from_secs(5);
pub const SYSTEM_INTERVAL: Duration = Duration::from_secs(30);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A repeating job, aborted when dropped.
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `tick` every `period`, first after one full period.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let now = Instant::now();
            let start = now.checked_add(period).unwrap_or(now);
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tick().await;
            }
        });
        debug!("Scheduled {} every {:?}", name, period);
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Which system metrics are gathered on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricToggles {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub uptime: bool,
}

impl From<&MonitorConfig> for MetricToggles {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            cpu: config.cpu_enabled,
            memory: config.memory_enabled,
            disk: config.disk_enabled,
            uptime: config.uptime_enabled,
        }
    }
}

/// Everything a tick needs; cloned into each task.
#[derive(Clone)]
pub struct PollContext {
    pub probe: Arc<dyn LivenessProbe>,
    pub metrics: Arc<dyn HostMetricsProvider>,
    pub publisher: Publisher,
    pub fanout: StatusFanout,
}

/// One process-check pass, in list order.
pub async fn process_tick(ctx: &PollContext, names: &[String]) {
    for name in names {
        match ctx.probe.check_process(name).await {
            Ok(running) => {
                let state = process_state_label(running);
                ctx.fanout
                    .status(Status::new(StatusKind::ProcessStatus, name.as_str(), state));
                ctx.publisher.process_status(name, state);
            }
            Err(e) => warn!("Process check for {} failed: {}", name, e),
        }
    }
}

/// One service-check pass, in list order.
pub async fn service_tick(ctx: &PollContext, names: &[String]) {
    for name in names {
        match ctx.probe.check_service(name).await {
            Ok(report) => {
                let state = report.state.as_str();
                let mut status = Status::new(StatusKind::ServiceStatus, name.as_str(), state);
                if let Some(display_name) = report.display_name {
                    status = status.with_detail("displayName", display_name);
                }
                if let Some(description) = report.description {
                    status = status.with_detail("description", description);
                }
                ctx.fanout.status(status);
                ctx.publisher.service_status(name, state);
            }
            Err(e) => warn!("Service check for {} failed: {}", name, e),
        }
    }
}

/// Timer path: whole percents, published when connected.
pub async fn system_tick(ctx: &PollContext, toggles: MetricToggles) {
    let snapshot = match ctx.metrics.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Host metrics unavailable: {}", e);
            return;
        }
    };

    let mut readings: Vec<(String, String, String)> = Vec::new();
    if toggles.cpu {
        readings.push(("cpu".into(), "cpu".into(), whole_percent(snapshot.cpu_percent)));
    }
    if toggles.memory {
        readings.push((
            "memory".into(),
            "memory".into(),
            whole_percent(snapshot.memory_percent),
        ));
    }
    if toggles.disk {
        for disk in &snapshot.disks {
            readings.push((
                format!("disk_{}", disk.label),
                format!("disk/{}", disk.label),
                whole_percent(disk.percent_used),
            ));
        }
    }
    if toggles.uptime {
        readings.push(("uptime".into(), "uptime".into(), snapshot.uptime_secs.to_string()));
    }

    for (name, path, value) in readings {
        ctx.fanout
            .status(Status::new(StatusKind::System, name, value.as_str()));
        if let Some(topic) = ctx.publisher.system(&path, &value) {
            ctx.fanout.metric(Metric::mqtt(topic, value));
        }
    }
}

/// On-demand path: one-decimal percents, status only.
pub async fn refresh_tick(ctx: &PollContext, toggles: MetricToggles) {
    let snapshot = match ctx.metrics.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Host metrics unavailable: {}", e);
            return;
        }
    };

    if toggles.cpu {
        ctx.fanout.status(Status::new(
            StatusKind::System,
            "cpu",
            one_decimal_percent(snapshot.cpu_percent),
        ));
    }
    if toggles.memory {
        ctx.fanout.status(Status::new(
            StatusKind::System,
            "memory",
            one_decimal_percent(snapshot.memory_percent),
        ));
    }
    if toggles.disk {
        for disk in &snapshot.disks {
            ctx.fanout.status(Status::new(
                StatusKind::System,
                format!("disk_{}", disk.label),
                one_decimal_percent(disk.percent_used),
            ));
        }
    }
}

#[derive(Default)]
pub struct PollScheduler {
    process: Option<ScheduledTask>,
    service: Option<ScheduledTask>,
    system: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the config-driven tasks, then schedules them for `config`.
    pub fn rebuild(&mut self, config: &MonitorConfig, ctx: &PollContext) {
        self.clear_polls();

        let processes = Arc::new(config.processes());
        if !processes.is_empty() {
            let ctx = ctx.clone();
            self.process = Some(ScheduledTask::every("process", PROCESS_INTERVAL, move || {
                let ctx = ctx.clone();
                let names = processes.clone();
                async move { process_tick(&ctx, &names).await }
            }));
        }

        let services = Arc::new(config.services());
        if !services.is_empty() {
            let ctx = ctx.clone();
            self.service = Some(ScheduledTask::every(
                "service",
                config.service_interval(),
                move || {
                    let ctx = ctx.clone();
                    let names = services.clone();
                    async move { service_tick(&ctx, &names).await }
                },
            ));
        }

        let toggles = MetricToggles::from(config);
        let ctx = ctx.clone();
        self.system = Some(ScheduledTask::every("system", SYSTEM_INTERVAL, move || {
            let ctx = ctx.clone();
            async move { system_tick(&ctx, toggles).await }
        }));
    }

    /// Starts the connection heartbeat if it is not already running.
    pub fn start_heartbeat(&mut self, connection: ConnectionManager) {
        if self.heartbeat.is_some() {
            return;
        }
        self.heartbeat = Some(ScheduledTask::every("heartbeat", HEARTBEAT_INTERVAL, move || {
            connection.emit_status();
            std::future::ready(())
        }));
    }

    fn clear_polls(&mut self) {
        self.process = None;
        self.service = None;
        self.system = None;
    }

    pub fn shutdown(&mut self) {
        self.clear_polls();
        self.heartbeat = None;
    }

    /// Names of the tasks currently scheduled.
    pub fn active(&self) -> Vec<&'static str> {
        [&self.process, &self.service, &self.system, &self.heartbeat]
            .into_iter()
            .flatten()
            .filter(|task| task.is_running())
            .map(ScheduledTask::name)
            .collect()
    }
}
