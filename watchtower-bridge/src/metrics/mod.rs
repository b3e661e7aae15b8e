//! Host metrics snapshot
//!
//! Provides:
//! - CPU load and memory utilization
//! - Per-volume disk utilization with topic-safe labels
//! - Uptime
//! - The two percentage renderings used by timer and on-demand paths

use crate::error::ProbeError;
use futures::future::BoxFuture;
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disks: Vec<DiskUsage>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub label: String,
    pub percent_used: f64,
}

pub trait HostMetricsProvider: Send + Sync {
    fn snapshot(&self) -> BoxFuture<'_, Result<HostSnapshot, ProbeError>>;
}

/// `sysinfo`-backed provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoMetrics;

impl HostMetricsProvider for SysinfoMetrics {
    fn snapshot(&self) -> BoxFuture<'_, Result<HostSnapshot, ProbeError>> {
        Box::pin(async {
            debug!("Collecting host metrics...");
            let mut sys = System::new();
            sys.refresh_cpu();
            // CPU usage is a delta between two refreshes
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            sys.refresh_cpu();
            sys.refresh_memory();

            let disks = Disks::new_with_refreshed_list()
                .list()
                .iter()
                .filter(|d| d.total_space() > 0)
                .map(|d| DiskUsage {
                    label: disk_label(&d.mount_point().to_string_lossy()),
                    percent_used: ratio_percent(
                        d.total_space().saturating_sub(d.available_space()),
                        d.total_space(),
                    ),
                })
                .collect();

            Ok(HostSnapshot {
                cpu_percent: f64::from(sys.global_cpu_info().cpu_usage()),
                memory_percent: ratio_percent(sys.used_memory(), sys.total_memory()),
                disks,
                uptime_secs: System::uptime(),
            })
        })
    }
}

fn ratio_percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// `C:\` becomes `C`; `/var/log` becomes `var_log`; `/` becomes `root`.
pub fn disk_label(mount: &str) -> String {
    let stripped: String = mount.chars().filter(|c| *c != '\\' && *c != ':').collect();
    let trimmed = stripped.trim_matches('/');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.replace('/', "_")
    }
}

/// Timer path rendering: nearest whole percent.
pub fn whole_percent(value: f64) -> String {
    format!("{}%", value.round() as i64)
}

/// On-demand rendering: one decimal place.
pub fn one_decimal_percent(value: f64) -> String {
    format!("{value:.1}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_renderings() {
        assert_eq!(whole_percent(41.5), "42%");
        assert_eq!(whole_percent(41.49), "41%");
        assert_eq!(whole_percent(0.0), "0%");
        assert_eq!(one_decimal_percent(41.46), "41.5%");
        assert_eq!(one_decimal_percent(100.0), "100.0%");
    }

    #[test]
    fn test_disk_labels() {
        assert_eq!(disk_label("C:\\"), "C");
        assert_eq!(disk_label("D:"), "D");
        assert_eq!(disk_label("/"), "root");
        assert_eq!(disk_label("/var/log"), "var_log");
        assert_eq!(disk_label("/home/"), "home");
    }

    #[test]
    fn test_ratio_handles_empty_volume() {
        assert_eq!(ratio_percent(5, 0), 0.0);
        assert_eq!(ratio_percent(1, 4), 25.0);
    }

    #[tokio::test]
    async fn test_snapshot_collection() {
        let snapshot = SysinfoMetrics.snapshot().await.unwrap();
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!(snapshot.cpu_percent >= 0.0);
        for disk in &snapshot.disks {
            assert!(!disk.label.is_empty());
            assert!(!disk.label.contains('/'));
        }
    }
}
