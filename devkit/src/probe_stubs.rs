/*!
Scripted host probes

Stand-ins for the process/service probes and the host metrics provider.
Tests decide what each name reports; unknown processes read as not running
and unknown services as not found.
*/

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use watchtower_bridge::metrics::DiskUsage;
use watchtower_bridge::{
    HostMetricsProvider, HostSnapshot, LivenessProbe, ProbeError, ServiceReport, ServiceState,
};

#[derive(Debug, Clone)]
enum Scripted<T> {
    Report(T),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedProbe {
    processes: Mutex<HashMap<String, Scripted<bool>>>,
    services: Mutex<HashMap<String, Scripted<ServiceReport>>>,
    process_calls: AtomicUsize,
    service_calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_process(&self, name: &str, running: bool) {
        self.processes
            .lock()
            .insert(name.to_string(), Scripted::Report(running));
    }

    pub fn fail_process(&self, name: &str, reason: &str) {
        self.processes
            .lock()
            .insert(name.to_string(), Scripted::Fail(reason.to_string()));
    }

    pub fn set_service(&self, name: &str, report: ServiceReport) {
        self.services
            .lock()
            .insert(name.to_string(), Scripted::Report(report));
    }

    pub fn set_service_state(&self, name: &str, state: ServiceState) {
        self.set_service(name, ServiceReport::bare(state));
    }

    pub fn fail_service(&self, name: &str, reason: &str) {
        self.services
            .lock()
            .insert(name.to_string(), Scripted::Fail(reason.to_string()));
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn service_calls(&self) -> usize {
        self.service_calls.load(Ordering::SeqCst)
    }
}

impl LivenessProbe for ScriptedProbe {
    fn check_process<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ProbeError>> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.processes.lock().get(name).cloned();
        Box::pin(async move {
            match scripted {
                Some(Scripted::Report(running)) => Ok(running),
                Some(Scripted::Fail(reason)) => Err(ProbeError::Unavailable(reason)),
                None => Ok(false),
            }
        })
    }

    fn check_service<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ServiceReport, ProbeError>> {
        self.service_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.services.lock().get(name).cloned();
        Box::pin(async move {
            match scripted {
                Some(Scripted::Report(report)) => Ok(report),
                Some(Scripted::Fail(reason)) => Err(ProbeError::Unavailable(reason)),
                None => Ok(ServiceReport::bare(ServiceState::NotFound)),
            }
        })
    }
}

/// Host metrics provider returning a fixed snapshot.
pub struct ScriptedMetrics {
    snapshot: Mutex<Option<HostSnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedMetrics {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            calls: AtomicUsize::new(0),
        }
    }

    /// cpu 12.34%, memory 56.78%, `C` at 80.26% and 7200 s of uptime.
    pub fn typical() -> Self {
        Self::new(HostSnapshot {
            cpu_percent: 12.34,
            memory_percent: 56.78,
            disks: vec![DiskUsage {
                label: "C".into(),
                percent_used: 80.26,
            }],
            uptime_secs: 7200,
        })
    }

    pub fn set(&self, snapshot: HostSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }

    /// Makes every following snapshot fail.
    pub fn fail(&self) {
        *self.snapshot.lock() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HostMetricsProvider for ScriptedMetrics {
    fn snapshot(&self) -> BoxFuture<'_, Result<HostSnapshot, ProbeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot.lock().clone();
        Box::pin(async move {
            snapshot.ok_or_else(|| ProbeError::Unavailable("scripted metrics failure".into()))
        })
    }
}
