/*!
Test harness for the Watchtower bridge

Wires a complete `Bridge` over the mock transport, scripted probes and an
in-memory config store, with:
- Helpers to play the broker's side and let the bridge catch up
- Collection of everything fanned out to the presentation surface
- Assertions on published traffic
*/

use crate::mqtt_stub::MockTransportFactory;
use crate::probe_stubs::{ScriptedMetrics, ScriptedProbe};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use watchtower_bridge::transport::TransportEvent;
use watchtower_bridge::{
    Bridge, BridgeEvent, MemoryConfigStore, Metric, MonitorConfig, Status, StatusKind,
};

/// Yields this many times per settle; enough for the pump and any tick
/// that was due to run to completion.
const SETTLE_ROUNDS: usize = 32;

/// Config pointing at a broker, everything else at defaults.
pub fn broker_config(host: &str, topic: &str) -> MonitorConfig {
    MonitorConfig {
        host: Some(host.to_string()),
        topic: topic.to_string(),
        ..MonitorConfig::default()
    }
}

pub struct TestHarness {
    pub bridge: Bridge,
    pub transport: MockTransportFactory,
    pub probe: Arc<ScriptedProbe>,
    pub metrics: Arc<ScriptedMetrics>,
    pub store: Arc<MemoryConfigStore>,
    events: broadcast::Receiver<BridgeEvent>,
    seen: Vec<BridgeEvent>,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    /// Builds a bridge whose store starts out holding `initial`. Nothing runs
    /// until [`TestHarness::start`].
    pub fn new(initial: Option<MonitorConfig>) -> Self {
        env_logger::try_init().ok();

        let transport = MockTransportFactory::new();
        let probe = Arc::new(ScriptedProbe::new());
        let metrics = Arc::new(ScriptedMetrics::typical());
        let store = Arc::new(MemoryConfigStore::new(initial));
        let bridge = Bridge::new(
            store.clone(),
            Arc::new(transport.clone()),
            probe.clone(),
            metrics.clone(),
        );
        let events = bridge.subscribe();

        Self {
            bridge,
            transport,
            probe,
            metrics,
            store,
            events,
            seen: Vec::new(),
            expectations: Vec::new(),
        }
    }

    pub async fn start(&self) {
        self.bridge.start();
        self.settle().await;
    }

    /// Lets spawned tasks run until they block again.
    pub async fn settle(&self) {
        for _ in 0..SETTLE_ROUNDS {
            tokio::task::yield_now().await;
        }
    }

    /// Moves a paused clock forward, then settles.
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }

    /// Acknowledges the latest client's connection.
    pub async fn connect(&self) {
        self.transport.simulate(TransportEvent::Connected);
        self.settle().await;
        log::info!("🔗 [HARNESS] Broker connection acknowledged");
    }

    pub async fn broker_event(&self, event: TransportEvent) {
        self.transport.simulate(event);
        self.settle().await;
    }

    pub async fn incoming(&self, topic: &str, payload: &str) {
        self.transport.simulate_incoming(topic, payload);
        self.settle().await;
    }

    /// Pulls everything fanned out so far into the harness.
    pub fn collect(&mut self) -> &[BridgeEvent] {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.seen.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("⏰ [HARNESS] Fan-out lagged, {} events lost", skipped)
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        &self.seen
    }

    pub fn statuses(&mut self) -> Vec<Status> {
        self.collect()
            .iter()
            .filter_map(BridgeEvent::as_status)
            .cloned()
            .collect()
    }

    pub fn metrics_seen(&mut self) -> Vec<Metric> {
        self.collect()
            .iter()
            .filter_map(BridgeEvent::as_metric)
            .cloned()
            .collect()
    }

    /// Most recent status of `kind` named `name`.
    pub fn last_status(&mut self, kind: StatusKind, name: &str) -> Option<Status> {
        self.statuses()
            .into_iter()
            .rev()
            .find(|s| s.kind == kind && s.name == name)
    }

    pub fn config_changes(&mut self) -> usize {
        self.collect()
            .iter()
            .filter(|e| matches!(e, BridgeEvent::ConfigChanged))
            .count()
    }

    /// Forgets collected events and recorded traffic.
    pub fn reset(&mut self) {
        self.collect();
        self.seen.clear();
        self.transport.clear();
        self.expectations.clear();
        log::info!("🧹 [HARNESS] Reset");
    }

    /// Expects exactly `count` publications on `topic` by verification time.
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());
        for expectation in &self.expectations {
            let actual = self.transport.find_messages_by_topic(&expectation.topic).len();
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual
                );
            }
        }
        Ok(())
    }

    pub fn assert_message_sent(&self, topic: &str, payload: &str) -> Result<()> {
        if self
            .transport
            .find_messages_by_topic(topic)
            .iter()
            .any(|msg| msg.payload == payload)
        {
            log::info!("✅ Found expected message on {}", topic);
            return Ok(());
        }
        anyhow::bail!("Expected '{}' not found on topic: {}", payload, topic);
    }

    pub fn assert_nothing_published_under(&self, prefix: &str) -> Result<()> {
        let stray: Vec<String> = self
            .transport
            .get_published_messages()
            .into_iter()
            .filter(|msg| msg.topic.starts_with(prefix))
            .map(|msg| msg.topic)
            .collect();
        if stray.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Unexpected publications under '{}': {:?}", prefix, stray)
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.transport.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.transport.subscribed_filters(),
            clients_built: self.transport.connect_count(),
        }
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
    pub clients_built: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Test Statistics:");
        println!("  Clients built: {}", self.clients_built);
        println!("  Total messages: {}", self.total_messages);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
        println!("  Subscriptions: {:?}", self.subscriptions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchtower_bridge::ConnectionState;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new(Some(broker_config("10.0.0.5", "siteA")));
        harness.start().await;
        harness.connect().await;

        assert!(harness.bridge.connection_status().connected);
        assert_eq!(harness.transport.subscribed_filters(), vec!["siteA/#"]);

        harness.incoming("siteA/process_status/app.exe", "running").await;
        let status = harness
            .last_status(StatusKind::ProcessStatus, "app.exe")
            .unwrap();
        assert_eq!(status.state, "running");

        let stats = harness.get_stats();
        assert_eq!(stats.clients_built, 1);
    }

    #[tokio::test]
    async fn test_expectations_and_reset() {
        let mut harness = TestHarness::new(Some(broker_config("10.0.0.5", "siteA")));
        harness.start().await;
        harness.connect().await;

        assert!(harness.bridge.connection().publish("siteA/custom", "1"));
        harness.expect_messages("siteA/custom", 1);
        harness.verify_expectations().unwrap();
        harness.assert_message_sent("siteA/custom", "1").unwrap();
        assert!(harness.assert_nothing_published_under("siteA/").is_err());

        harness.reset();
        assert_eq!(harness.get_stats().total_messages, 0);
        assert_eq!(
            harness.bridge.connection_status().state,
            ConnectionState::Connected
        );
    }
}
