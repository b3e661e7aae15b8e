//! Liveness probes for processes and OS services
//!
//! Provides:
//! - Process presence checks (tasklist on Windows, sysinfo elsewhere)
//! - Windows service state via PowerShell `Get-Service`
//! - A trait seam so the scheduler can be driven by scripted probes

mod process;
mod service;

pub use service::{parse_service_json, ServiceReport, ServiceState};

use crate::error::ProbeError;
use futures::future::BoxFuture;
use std::time::Duration;

/// Upper bound for any shelled-out probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub trait LivenessProbe: Send + Sync {
    fn check_process<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ProbeError>>;

    /// Platform failures are folded into the report's state; an `Err` means
    /// the probe itself could not run.
    fn check_service<'a>(&'a self, name: &'a str)
        -> BoxFuture<'a, Result<ServiceReport, ProbeError>>;
}

/// Probes the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn check_process<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ProbeError>> {
        Box::pin(process::is_running(name))
    }

    fn check_service<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ServiceReport, ProbeError>> {
        Box::pin(service::query(name))
    }
}

pub fn process_state_label(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "not running"
    }
}
