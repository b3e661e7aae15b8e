/*!
Mock MQTT transport for development without a broker

Plugs into the bridge through `TransportFactory`. Records every client the
bridge builds, every subscription and publication, and lets tests play the
broker's side by pushing transport events into the bridge.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use watchtower_bridge::transport::{
    BrokerSettings, EventSink, Transport, TransportEvent, TransportFactory,
};
use watchtower_bridge::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub generation: u64,
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSubscription {
    pub generation: u64,
    pub filter: String,
}

#[derive(Default)]
struct Recorder {
    connects: Vec<BrokerSettings>,
    sinks: Vec<EventSink>,
    live: usize,
    closed: usize,
    subscriptions: Vec<MockSubscription>,
    published: Vec<MockMessage>,
    fail_next_connect: Option<String>,
    fail_subscribe: bool,
    fail_publish: bool,
}

/// Factory handing out recording transports; clones share one recorder.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    state: Arc<Mutex<Recorder>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `connect` fail with `reason`.
    pub fn fail_next_connect(&self, reason: &str) {
        self.state.lock().fail_next_connect = Some(reason.to_string());
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Plays `event` on the most recently built client. Returns false when
    /// no client was ever built or the bridge stopped listening.
    pub fn simulate(&self, event: TransportEvent) -> bool {
        let sink = self.state.lock().sinks.last().cloned();
        match sink {
            Some(sink) => {
                log::info!("📨 [MOCK] Simulated {:?} on generation {}", event, sink.generation());
                sink.send(event)
            }
            None => false,
        }
    }

    /// Plays `event` as if it came from the client of `generation`.
    pub fn simulate_for(&self, generation: u64, event: TransportEvent) -> bool {
        let sink = self
            .state
            .lock()
            .sinks
            .iter()
            .find(|sink| sink.generation() == generation)
            .cloned();
        match sink {
            Some(sink) => {
                log::info!("📨 [MOCK] Simulated {:?} on generation {}", event, generation);
                sink.send(event)
            }
            None => false,
        }
    }

    /// Shorthand for an inbound broker message on the latest client.
    pub fn simulate_incoming(&self, topic: &str, payload: &str) -> bool {
        self.simulate(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn last_settings(&self) -> Option<BrokerSettings> {
        self.state.lock().connects.last().cloned()
    }

    /// Generations of every client built so far, oldest first.
    pub fn generations(&self) -> Vec<u64> {
        self.state
            .lock()
            .sinks
            .iter()
            .map(EventSink::generation)
            .collect()
    }

    /// Clients built and not yet closed.
    pub fn live_transports(&self) -> usize {
        self.state.lock().live
    }

    pub fn closed_transports(&self) -> usize {
        self.state.lock().closed
    }

    pub fn get_subscriptions(&self) -> Vec<MockSubscription> {
        self.state.lock().subscriptions.clone()
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.filter.clone())
            .collect()
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.state.lock().published.clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parses the last payload published on `topic` as JSON.
    pub fn get_last_json_message(&self, topic: &str) -> anyhow::Result<Option<serde_json::Value>> {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_str(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Forgets recorded traffic; built clients stay live.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.subscriptions.clear();
        state.published.clear();
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(
        &self,
        settings: &BrokerSettings,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock();
        state.connects.push(settings.clone());
        if let Some(reason) = state.fail_next_connect.take() {
            log::info!("❌ [MOCK] Refused client for {}:{}", settings.host, settings.port);
            return Err(TransportError::InvalidSettings(reason));
        }

        let generation = sink.generation();
        state.sinks.push(sink);
        state.live += 1;
        log::info!(
            "🔌 [MOCK] Built client {} for {}:{} (generation {})",
            settings.client_id,
            settings.host,
            settings.port,
            generation
        );

        Ok(Box::new(MockTransport {
            generation,
            open: Mutex::new(true),
            state: self.state.clone(),
        }))
    }
}

struct MockTransport {
    generation: u64,
    open: Mutex<bool>,
    state: Arc<Mutex<Recorder>>,
}

impl MockTransport {
    fn release(&self) {
        let mut open = self.open.lock();
        if *open {
            *open = false;
            let mut state = self.state.lock();
            state.live -= 1;
            state.closed += 1;
        }
    }
}

impl Transport for MockTransport {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if !*self.open.lock() {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(TransportError::Closed);
        }
        state.subscriptions.push(MockSubscription {
            generation: self.generation,
            filter: filter.to_string(),
        });
        log::info!("📥 [MOCK] Subscribed to {}", filter);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        if !*self.open.lock() {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock();
        if state.fail_publish {
            return Err(TransportError::Closed);
        }
        state.published.push(MockMessage {
            generation: self.generation,
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        Ok(())
    }

    fn close(&self) {
        self.release();
        log::info!("🔌 [MOCK] Closed client of generation {}", self.generation);
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn settings() -> BrokerSettings {
        let config = watchtower_bridge::MonitorConfig {
            host: Some("broker.local".into()),
            ..Default::default()
        };
        BrokerSettings::from_config(&config).unwrap()
    }

    #[test]
    fn test_mock_transport_records_traffic() {
        let factory = MockTransportFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.connect(&settings(), EventSink::new(4, tx)).unwrap();

        transport.subscribe("siteA/#").unwrap();
        transport.publish("siteA/config", "{}", true).unwrap();

        assert_eq!(factory.subscribed_filters(), vec!["siteA/#"]);
        let messages = factory.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].generation, 4);
        assert!(messages[0].retain);
        assert_eq!(factory.live_transports(), 1);
    }

    #[test]
    fn test_close_and_drop_count_once() {
        let factory = MockTransportFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory.connect(&settings(), EventSink::new(1, tx)).unwrap();

        transport.close();
        assert!(transport.publish("a/b", "x", false).is_err());
        drop(transport);

        assert_eq!(factory.live_transports(), 0);
        assert_eq!(factory.closed_transports(), 1);
    }

    #[test]
    fn test_refused_connect_is_recorded() {
        let factory = MockTransportFactory::new();
        factory.fail_next_connect("unreachable");
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(factory.connect(&settings(), EventSink::new(1, tx.clone())).is_err());
        assert!(factory.connect(&settings(), EventSink::new(2, tx)).is_ok());
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(factory.generations(), vec![2]);
    }

    #[tokio::test]
    async fn test_simulate_targets_latest_client() {
        let factory = MockTransportFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _first = factory.connect(&settings(), EventSink::new(1, tx.clone())).unwrap();
        let _second = factory.connect(&settings(), EventSink::new(2, tx)).unwrap();

        assert!(factory.simulate(TransportEvent::Connected));
        assert!(factory.simulate_for(1, TransportEvent::Disconnected));
        assert!(!factory.simulate_for(9, TransportEvent::Disconnected));

        assert_eq!(rx.recv().await.unwrap().generation, 2);
        assert_eq!(rx.recv().await.unwrap().generation, 1);
    }
}
