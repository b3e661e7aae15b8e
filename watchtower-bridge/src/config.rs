//! Monitoring configuration and its persistence
//!
//! Handles:
//! - Broker connection settings (host, port, credentials, root topic)
//! - Poll lists for processes and services
//! - Per-metric toggles and cadences
//! - Storage as a single JSON document per installation

use crate::error::ConfigError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 15;
pub const MIN_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_MAX_RECONNECT_DELAY_SECS: u64 = 30;
/// Ceiling for operator-supplied cadences and delays: one day.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Everything the operator can edit. Replaced wholesale, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_status_interval")]
    pub status_update_interval: u64,
    #[serde(default)]
    pub mqtt_reconnect_min_delay: Option<u64>,
    #[serde(default)]
    pub mqtt_reconnect_max_delay: Option<u64>,
    #[serde(default)]
    pub process_check: Vec<String>,
    #[serde(default)]
    pub service_check: Vec<String>,
    #[serde(default = "enabled")]
    pub cpu_enabled: bool,
    #[serde(default = "enabled")]
    pub memory_enabled: bool,
    #[serde(default = "enabled")]
    pub disk_enabled: bool,
    #[serde(default = "enabled")]
    pub uptime_enabled: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_status_interval() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}

fn enabled() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            topic: String::new(),
            status_update_interval: DEFAULT_STATUS_INTERVAL_SECS,
            mqtt_reconnect_min_delay: None,
            mqtt_reconnect_max_delay: None,
            process_check: Vec::new(),
            service_check: Vec::new(),
            cpu_enabled: true,
            memory_enabled: true,
            disk_enabled: true,
            uptime_enabled: true,
        }
    }
}

impl MonitorConfig {
    /// Broker host, if one is configured. Blank strings count as absent.
    pub fn broker_host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.broker_host().is_some()
    }

    /// Root namespace with any trailing separators removed.
    pub fn root_topic(&self) -> &str {
        self.topic.trim().trim_end_matches('/')
    }

    /// The single subscription filter for this configuration.
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.root_topic())
    }

    /// 0 means the default; anything above a day is capped at a day.
    pub fn service_interval(&self) -> Duration {
        match self.status_update_interval {
            0 => Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            secs => Duration::from_secs(secs.min(MAX_INTERVAL_SECS)),
        }
    }

    /// Retry backoff bounds: at least 5s, at most a day, and the ceiling never
    /// below the floor.
    pub fn reconnect_bounds(&self) -> (Duration, Duration) {
        let min = self
            .mqtt_reconnect_min_delay
            .unwrap_or(MIN_RECONNECT_DELAY_SECS)
            .clamp(MIN_RECONNECT_DELAY_SECS, MAX_INTERVAL_SECS);
        let max = self
            .mqtt_reconnect_max_delay
            .unwrap_or(DEFAULT_MAX_RECONNECT_DELAY_SECS)
            .clamp(min, MAX_INTERVAL_SECS);
        (Duration::from_secs(min), Duration::from_secs(max))
    }

    /// Process names in list order with duplicates removed.
    pub fn processes(&self) -> Vec<String> {
        dedup_names(&self.process_check)
    }

    pub fn services(&self) -> Vec<String> {
        dedup_names(&self.service_check)
    }
}

pub(crate) fn dedup_names(names: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !seen.iter().any(|s: &String| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Durable home of the configuration document.
pub trait ConfigStore: Send + Sync {
    /// `None` means nothing usable has been saved yet.
    fn load(&self) -> Option<MonitorConfig>;
    fn save(&self, config: &MonitorConfig) -> Result<(), ConfigError>;
}

/// JSON file in the per-user config directory.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `WATCHTOWER_CONFIG` if set, otherwise `<config_dir>/watchtower/config.json`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("WATCHTOWER_CONFIG") {
            return Ok(Self::new(path));
        }
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("watchtower");
        path.push("config.json");
        Ok(path)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Option<MonitorConfig> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No config at {}: {}", self.path.display(), e);
                return None;
            }
        };
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, config: &MonitorConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Process-local store, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<Option<MonitorConfig>>,
}

impl MemoryConfigStore {
    pub fn new(initial: Option<MonitorConfig>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Option<MonitorConfig> {
        self.inner.lock().clone()
    }

    fn save(&self, config: &MonitorConfig) -> Result<(), ConfigError> {
        *self.inner.lock() = Some(config.clone());
        Ok(())
    }
}
