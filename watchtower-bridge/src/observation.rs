//! Observation records carried to the presentation surface

use serde::Serialize;
use std::collections::BTreeMap;

/// Where a raw metric came from. Locally observed values are echoed only
/// once published, so they carry the broker source too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Mqtt,
}

/// Raw, unclassified value (the audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metric {
    pub topic: String,
    pub value: String,
    pub source: MetricSource,
}

impl Metric {
    pub fn mqtt(topic: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            value: value.into(),
            source: MetricSource::Mqtt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    ProcessStatus,
    ServiceStatus,
    System,
    Mqtt,
    Config,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::ProcessStatus => "process_status",
            StatusKind::ServiceStatus => "service_status",
            StatusKind::System => "system",
            StatusKind::Mqtt => "mqtt",
            StatusKind::Config => "config",
        }
    }
}

/// Classified, semantically named observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub kind: StatusKind,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Status {
    pub fn new(kind: StatusKind, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            state: state.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// One notification delivered to the presentation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum BridgeEvent {
    Metrics(Metric),
    Status(Status),
    /// Dependent views should reload whatever they derive from the config.
    ConfigChanged,
}

impl BridgeEvent {
    pub fn as_status(&self) -> Option<&Status> {
        match self {
            BridgeEvent::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&Metric> {
        match self {
            BridgeEvent::Metrics(metric) => Some(metric),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_shape() {
        let status = Status::new(StatusKind::ServiceStatus, "Spooler", "running")
            .with_detail("displayName", "Print Spooler");
        let json = serde_json::to_value(BridgeEvent::Status(status)).unwrap();
        assert_eq!(json["channel"], "status");
        assert_eq!(json["payload"]["kind"], "service_status");
        assert_eq!(json["payload"]["details"]["displayName"], "Print Spooler");
    }

    #[test]
    fn test_empty_details_are_omitted() {
        let json = serde_json::to_value(Status::new(StatusKind::Mqtt, "connection", "connected"))
            .unwrap();
        assert!(json.get("details").is_none());
    }
}
