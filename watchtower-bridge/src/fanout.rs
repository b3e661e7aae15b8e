//! Status fan-out: the only path from the core to the presentation surface.
//!
//! Backed by a broadcast channel. Subscribing opens a stream, dropping the
//! receiver unsubscribes. With nobody listening (window closed) every emit is
//! a silent no-op.

use crate::observation::{BridgeEvent, Metric, Status};
use tokio::sync::broadcast;
use tracing::trace;

const FANOUT_CAPACITY: usize = 512;

#[derive(Clone)]
pub struct StatusFanout {
    tx: broadcast::Sender<BridgeEvent>,
}

impl StatusFanout {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn metric(&self, metric: Metric) {
        self.emit(BridgeEvent::Metrics(metric));
    }

    pub fn status(&self, status: Status) {
        self.emit(BridgeEvent::Status(status));
    }

    pub fn config_changed(&self) {
        self.emit(BridgeEvent::ConfigChanged);
    }

    fn emit(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            trace!("No presentation surface attached, event dropped");
        }
    }
}

impl Default for StatusFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::StatusKind;

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let fanout = StatusFanout::new();
        fanout.status(Status::new(StatusKind::Mqtt, "connection", "connected"));
        fanout.config_changed();
        assert_eq!(fanout.listeners(), 0);
    }

    #[tokio::test]
    async fn test_dropped_surface_does_not_break_others() {
        let fanout = StatusFanout::new();
        let gone = fanout.subscribe();
        let mut alive = fanout.subscribe();
        drop(gone);

        fanout.metric(Metric::mqtt("siteA/x", "1"));
        assert_eq!(
            alive.recv().await.unwrap(),
            BridgeEvent::Metrics(Metric::mqtt("siteA/x", "1"))
        );
    }
}
