//! Inbound topic classification
//!
//! Every broker message yields its raw metric. Topics shaped
//! `process_status/<name>`, `service_status/<name>`, `system/cpu` and
//! `system/memory` additionally yield a status. Anything else, including
//! topics with a single segment, stays metric-only.

use crate::fanout::StatusFanout;
use crate::observation::{Metric, Status, StatusKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub metric: Metric,
    pub status: Option<Status>,
}

/// Pure classification of one message.
pub fn classify(topic: &str, payload: &str) -> Classified {
    Classified {
        metric: Metric::mqtt(topic, payload),
        status: status_for(topic, payload),
    }
}

fn status_for(topic: &str, payload: &str) -> Option<Status> {
    let mut segments = topic.split('/');
    let key = segments.next()?;
    let sub_key = segments.next()?;

    match (key, sub_key) {
        ("process_status", name) => Some(Status::new(StatusKind::ProcessStatus, name, payload)),
        ("service_status", name) => Some(Status::new(StatusKind::ServiceStatus, name, payload)),
        ("system", metric @ ("cpu" | "memory")) => {
            Some(Status::new(StatusKind::System, metric, payload))
        }
        _ => None,
    }
}

/// Classifies relative to the active root and forwards to the fan-out.
///
/// The metric keeps the topic exactly as received.
pub fn route(root: &str, topic: &str, payload: &str, fanout: &StatusFanout) {
    let relative = strip_root(root, topic);
    let Classified { status, .. } = classify(relative, payload);

    fanout.metric(Metric::mqtt(topic, payload));
    if let Some(status) = status {
        fanout.status(status);
    }
}

fn strip_root<'a>(root: &str, topic: &'a str) -> &'a str {
    if root.is_empty() {
        return topic;
    }
    topic
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::BridgeEvent;

    #[test]
    fn test_process_status_topic() {
        let out = classify("process_status/foo", "running");
        assert_eq!(out.metric, Metric::mqtt("process_status/foo", "running"));
        assert_eq!(
            out.status,
            Some(Status::new(StatusKind::ProcessStatus, "foo", "running"))
        );
    }

    #[test]
    fn test_service_status_topic() {
        let out = classify("service_status/Spooler", "stopped");
        assert_eq!(
            out.status,
            Some(Status::new(StatusKind::ServiceStatus, "Spooler", "stopped"))
        );
    }

    #[test]
    fn test_system_cpu_and_memory_only() {
        assert_eq!(
            classify("system/cpu", "42%").status,
            Some(Status::new(StatusKind::System, "cpu", "42%"))
        );
        assert_eq!(
            classify("system/memory", "61%").status,
            Some(Status::new(StatusKind::System, "memory", "61%"))
        );
        assert_eq!(classify("system/uptime", "3600").status, None);
        assert_eq!(classify("system/disk/C", "80%").status, None);
    }

    #[test]
    fn test_unrecognized_and_short_topics_are_metric_only() {
        let out = classify("other/thing", "x");
        assert_eq!(out.metric, Metric::mqtt("other/thing", "x"));
        assert_eq!(out.status, None);

        assert_eq!(classify("process_status", "running").status, None);
        assert_eq!(classify("", "").status, None);
    }

    #[test]
    fn test_route_strips_active_root() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();

        route("siteA", "siteA/process_status/notepad.exe", "running", &fanout);

        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::Metrics(Metric::mqtt("siteA/process_status/notepad.exe", "running"))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::Status(Status::new(
                StatusKind::ProcessStatus,
                "notepad.exe",
                "running"
            ))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_foreign_root_is_classified_as_is() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();

        route("siteA", "siteB/system/cpu", "10%", &fanout);

        assert!(rx.try_recv().unwrap().as_metric().is_some());
        assert!(rx.try_recv().is_err());
    }
}
