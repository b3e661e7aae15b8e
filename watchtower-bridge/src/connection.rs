//! Connection manager: at most one broker client, consistent with the
//! current configuration.
//!
//! Every client is stamped with a generation number. Reconfiguring closes the
//! old client, bumps the generation and only then builds the new one, so
//! events still in flight from a replaced client are recognised and dropped.

use crate::config::MonitorConfig;
use crate::fanout::StatusFanout;
use crate::observation::{Status, StatusKind};
use crate::router;
use crate::transport::{
    BrokerSettings, EventSink, TaggedEvent, Transport, TransportEvent, TransportFactory,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    NotConfigured,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::NotConfigured => "not_configured",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Inner {
    generation: u64,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    last_error: Option<String>,
    root: String,
    filter: String,
    /// Retained config JSON to publish on the next successful connect.
    announcement: Option<String>,
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.state == ConnectionState::Connected && self.transport.is_some(),
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }

    fn drop_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
    }
}

/// Cheap to clone; every clone manages the same client.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
    factory: Arc<dyn TransportFactory>,
    events: mpsc::UnboundedSender<TaggedEvent>,
    fanout: StatusFanout,
}

impl ConnectionManager {
    /// The receiver must be pumped into [`ConnectionManager::handle_event`].
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        fanout: StatusFanout,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                transport: None,
                state: ConnectionState::NotConfigured,
                last_error: None,
                root: String::new(),
                filter: String::new(),
                announcement: None,
            })),
            factory,
            events,
            fanout,
        };
        (manager, rx)
    }

    /// Force-closes any current client and builds one for `config`. Any
    /// pending config announcement is dropped.
    pub fn reconfigure(&self, config: &MonitorConfig) {
        self.rebuild(config, false);
    }

    /// Like [`ConnectionManager::reconfigure`] for an unchanged config: a
    /// pending announcement carries over to the new client.
    pub fn reconnect(&self, config: &MonitorConfig) {
        self.rebuild(config, true);
    }

    fn rebuild(&self, config: &MonitorConfig, keep_announcement: bool) {
        {
            let mut inner = self.inner.lock();
            inner.drop_transport();
            inner.root = config.root_topic().to_string();
            inner.filter = config.subscription_filter();
            if !keep_announcement {
                inner.announcement = None;
            }
            inner.last_error = None;

            match BrokerSettings::from_config(config) {
                None => {
                    info!("No broker host configured");
                    inner.state = ConnectionState::NotConfigured;
                }
                Some(settings) => {
                    let sink = EventSink::new(inner.generation, self.events.clone());
                    match self.factory.connect(&settings, sink) {
                        Ok(transport) => {
                            inner.transport = Some(transport);
                            inner.state = ConnectionState::Connecting;
                        }
                        Err(e) => {
                            error!("Failed to create MQTT client: {}", e);
                            inner.state = ConnectionState::Error;
                            inner.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }
        self.emit_status();
    }

    /// Closes the client for good; later events from it are ignored.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.drop_transport();
        inner.announcement = None;
        inner.state = ConnectionState::Disconnected;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connected
    }

    pub fn root_topic(&self) -> String {
        self.inner.lock().root.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Hands `payload` to the transport if connected. Never queues.
    pub fn publish(&self, topic: &str, payload: &str) -> bool {
        self.send(topic, payload, false)
    }

    pub fn publish_retained(&self, topic: &str, payload: &str) -> bool {
        self.send(topic, payload, true)
    }

    /// A failed hand-off still counts as attempted; it only skips the
    /// status refresh.
    fn send(&self, topic: &str, payload: &str, retain: bool) -> bool {
        let outcome = {
            let inner = self.inner.lock();
            match inner.transport.as_ref() {
                Some(transport) if inner.state == ConnectionState::Connected => {
                    transport.publish(topic, payload, retain)
                }
                _ => return false,
            }
        };
        match outcome {
            Ok(()) => self.emit_status(),
            Err(e) => warn!("Publish to {} failed: {}", topic, e),
        }
        true
    }

    /// Publishes `config_json` retained under `<root>/config` once the current
    /// client connects.
    pub fn announce_on_connect(&self, config_json: String) {
        self.inner.lock().announcement = Some(config_json);
    }

    pub fn connection_status_event(&self) -> Status {
        let status = self.status();
        let event = Status::new(StatusKind::Mqtt, "connection", status.state.as_str());
        match status.last_error {
            Some(err) => event.with_detail("error", err),
            None => event,
        }
    }

    pub fn emit_status(&self) {
        self.fanout.status(self.connection_status_event());
    }

    pub fn handle_event(&self, tagged: TaggedEvent) {
        let mut announced = false;
        let message_root = {
            let mut inner = self.inner.lock();
            if tagged.generation != inner.generation {
                debug!(
                    "Dropping event from replaced client (generation {} != {})",
                    tagged.generation, inner.generation
                );
                return;
            }

            match tagged.event {
                TransportEvent::Connected => {
                    inner.state = ConnectionState::Connected;
                    inner.last_error = None;
                    info!("Connected to broker, subscribing to {}", inner.filter);
                    if let Some(transport) = inner.transport.as_ref() {
                        if let Err(e) = transport.subscribe(&inner.filter) {
                            warn!("Subscribe to {} failed: {}", inner.filter, e);
                            inner.last_error = Some(e.to_string());
                        }
                    }
                    if let Some(json) = inner.announcement.take() {
                        let topic = format!("{}/config", inner.root);
                        match inner.transport.as_ref().map(|t| t.publish(&topic, &json, true)) {
                            Some(Ok(())) => announced = true,
                            Some(Err(e)) => warn!("Config announcement failed: {}", e),
                            None => {}
                        }
                    }
                    None
                }
                TransportEvent::Reconnecting => {
                    inner.state = ConnectionState::Reconnecting;
                    None
                }
                TransportEvent::Disconnected => {
                    inner.state = ConnectionState::Disconnected;
                    None
                }
                TransportEvent::Error(message) => {
                    inner.state = ConnectionState::Error;
                    inner.last_error = Some(message);
                    None
                }
                TransportEvent::Message { topic, payload } => {
                    Some((inner.root.clone(), topic, payload))
                }
            }
        };

        match message_root {
            Some((root, topic, payload)) => router::route(&root, &topic, &payload, &self.fanout),
            None => {
                self.emit_status();
                if announced {
                    self.fanout
                        .status(Status::new(StatusKind::Config, "update", "published"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::observation::BridgeEvent;

    #[derive(Default)]
    struct Recorded {
        built: usize,
        closed: usize,
        subscribed: Vec<String>,
        published: Vec<(String, String, bool)>,
    }

    #[derive(Default, Clone)]
    struct FakeFactory {
        log: Arc<Mutex<Recorded>>,
    }

    struct FakeTransport {
        log: Arc<Mutex<Recorded>>,
    }

    impl Transport for FakeTransport {
        fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
            self.log.lock().subscribed.push(filter.to_string());
            Ok(())
        }
        fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
            self.log
                .lock()
                .published
                .push((topic.into(), payload.into(), retain));
            Ok(())
        }
        fn close(&self) {
            self.log.lock().closed += 1;
        }
    }

    impl TransportFactory for FakeFactory {
        fn connect(
            &self,
            _settings: &BrokerSettings,
            _sink: EventSink,
        ) -> Result<Box<dyn Transport>, TransportError> {
            self.log.lock().built += 1;
            Ok(Box::new(FakeTransport {
                log: self.log.clone(),
            }))
        }
    }

    fn config(topic: &str) -> MonitorConfig {
        MonitorConfig {
            host: Some("10.0.0.5".into()),
            topic: topic.into(),
            ..MonitorConfig::default()
        }
    }

    fn connected(manager: &ConnectionManager) {
        manager.handle_event(TaggedEvent {
            generation: manager.generation(),
            event: TransportEvent::Connected,
        });
    }

    #[test]
    fn test_status_before_any_attempt() {
        let (manager, _rx) = ConnectionManager::new(Arc::new(FakeFactory::default()), StatusFanout::new());
        let status = manager.status();
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::NotConfigured);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_missing_host_builds_nothing() {
        let factory = FakeFactory::default();
        let (manager, _rx) = ConnectionManager::new(Arc::new(factory.clone()), StatusFanout::new());
        manager.reconfigure(&MonitorConfig::default());
        assert_eq!(manager.status().state, ConnectionState::NotConfigured);
        assert_eq!(factory.log.lock().built, 0);
    }

    #[test]
    fn test_publish_requires_connection() {
        let factory = FakeFactory::default();
        let (manager, _rx) = ConnectionManager::new(Arc::new(factory.clone()), StatusFanout::new());
        manager.reconfigure(&config("siteA"));
        assert_eq!(manager.status().state, ConnectionState::Connecting);
        assert!(!manager.publish("siteA/x", "1"));
        assert!(factory.log.lock().published.is_empty());

        connected(&manager);
        assert!(manager.publish("siteA/x", "1"));
        assert_eq!(factory.log.lock().published.len(), 1);
        assert_eq!(factory.log.lock().subscribed, vec!["siteA/#"]);
    }

    #[test]
    fn test_reconfigure_closes_previous_client() {
        let factory = FakeFactory::default();
        let (manager, _rx) = ConnectionManager::new(Arc::new(factory.clone()), StatusFanout::new());
        manager.reconfigure(&config("siteA"));
        let stale = manager.generation();
        manager.reconfigure(&config("siteB"));

        manager.handle_event(TaggedEvent {
            generation: stale,
            event: TransportEvent::Connected,
        });
        assert!(!manager.is_connected());

        connected(&manager);
        let log = factory.log.lock();
        assert_eq!((log.built, log.closed), (2, 1));
        assert_eq!(log.subscribed, vec!["siteB/#"]);
    }

    #[test]
    fn test_errors_are_recorded_not_fatal() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();
        let (manager, _events) = ConnectionManager::new(Arc::new(FakeFactory::default()), fanout);
        manager.reconfigure(&config("siteA"));
        manager.handle_event(TaggedEvent {
            generation: manager.generation(),
            event: TransportEvent::Error("connection refused".into()),
        });

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.last_error.as_deref(), Some("connection refused"));

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        let BridgeEvent::Status(status) = last else {
            panic!("expected a status event");
        };
        assert_eq!(status.state, "error");
        assert_eq!(status.detail("error"), Some("connection refused"));

        connected(&manager);
        assert_eq!(manager.status().last_error, None);
    }

    #[test]
    fn test_pending_announcement_goes_out_on_connect() {
        let factory = FakeFactory::default();
        let (manager, _rx) = ConnectionManager::new(Arc::new(factory.clone()), StatusFanout::new());
        manager.reconfigure(&config("siteA"));
        manager.announce_on_connect("{\"topic\":\"siteA\"}".into());
        connected(&manager);

        let log = factory.log.lock();
        assert_eq!(
            log.published,
            vec![("siteA/config".to_string(), "{\"topic\":\"siteA\"}".to_string(), true)]
        );
    }
}
