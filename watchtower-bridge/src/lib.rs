//! Watchtower Bridge - MQTT side of the monitoring dashboard
//!
//! Keeps one broker connection in line with an operator-editable
//! configuration and fans everything it observes out to the presentation
//! surface:
//! - Connection lifecycle with reconnect backoff and generation fencing
//! - Classification of inbound broker messages
//! - Scheduled process, service and host-metric polling
//! - Republishing of local observations under the active root topic

pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod observation;
pub mod probes;
pub mod publisher;
pub mod router;
pub mod scheduler;
pub mod transport;

pub use bridge::{Bridge, ConfigUpdate, ProcessCheck, ServiceCheck};
pub use config::{ConfigStore, FileConfigStore, MemoryConfigStore, MonitorConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{BridgeError, ConfigError, ProbeError, TransportError};
pub use fanout::StatusFanout;
pub use metrics::{HostMetricsProvider, HostSnapshot, SysinfoMetrics};
pub use observation::{BridgeEvent, Metric, MetricSource, Status, StatusKind};
pub use probes::{LivenessProbe, ServiceReport, ServiceState, SystemProbe};
pub use transport::{RumqttFactory, TransportFactory};
