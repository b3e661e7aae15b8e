//! Broker transport seam
//!
//! The connection manager only sees [`Transport`] handles built by a
//! [`TransportFactory`]; transport callbacks arrive as [`TransportEvent`]s on a
//! channel, tagged with the generation of the client that produced them. The
//! production implementation drives a `rumqttc` event loop on its own task and
//! closes by aborting that task (no graceful drain).

use crate::config::MonitorConfig;
use crate::error::TransportError;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Reconnecting,
    Disconnected,
    Error(String),
    Message { topic: String, payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Generation-stamped sender handed to each freshly built client.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Parameters for one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
}

impl BrokerSettings {
    /// `None` when the config names no broker. Every call draws a new client id.
    pub fn from_config(config: &MonitorConfig) -> Option<Self> {
        let host = config.broker_host()?;
        let (min_backoff, max_backoff) = config.reconnect_bounds();
        Some(Self {
            host: host.to_string(),
            port: config.port,
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
            client_id: format!("watchtower-{}", uuid::Uuid::new_v4().simple()),
            min_backoff,
            max_backoff,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.port == 0 {
            return Err(TransportError::InvalidSettings("port 0".into()));
        }
        if self.host.contains(char::is_whitespace) || self.host.contains('/') {
            return Err(TransportError::InvalidSettings(format!(
                "malformed host '{}'",
                self.host
            )));
        }
        Ok(())
    }
}

pub trait Transport: Send + Sync {
    /// Queues a subscribe request without waiting for the broker.
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;
    /// Queues a publish without waiting for acknowledgment.
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError>;
    /// Drops the connection immediately.
    fn close(&self);
}

pub trait TransportFactory: Send + Sync {
    fn connect(
        &self,
        settings: &BrokerSettings,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// `rumqttc`-backed factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttFactory;

impl TransportFactory for RumqttFactory {
    fn connect(
        &self,
        settings: &BrokerSettings,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        settings.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(settings.connect_timeout.as_secs());

        info!(
            "Connecting to mqtt://{}:{} as {}",
            settings.host, settings.port, settings.client_id
        );
        let poller = runtime.spawn(drive_event_loop(
            eventloop,
            sink,
            settings.min_backoff,
            settings.max_backoff,
        ));

        Ok(Box::new(RumqttTransport { client, poller }))
    }
}

struct RumqttTransport {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

impl RumqttTransport {
    fn ensure_running(&self) -> Result<(), TransportError> {
        if self.poller.is_finished() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for RumqttTransport {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.ensure_running()?;
        self.client.try_subscribe(filter, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        self.ensure_running()?;
        let qos = if retain {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        };
        self.client
            .try_publish(topic, qos, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn close(&self) {
        self.poller.abort();
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Polls the event loop forever, translating events for the manager.
///
/// After a failure the loop waits out the backoff (doubling up to `max`)
/// before polling again, which is what makes `rumqttc` reconnect.
async fn drive_event_loop(mut eventloop: EventLoop, sink: EventSink, min: Duration, max: Duration) {
    let mut backoff = min;
    loop {
        let delivered = match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                backoff = min;
                sink.send(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
                sink.send(TransportEvent::Message {
                    topic: publish.topic,
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                })
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => sink.send(TransportEvent::Disconnected),
            Ok(_) => true,
            Err(e) => {
                error!("MQTT connection error: {}", e);
                if !sink.send(TransportEvent::Error(e.to_string())) {
                    break;
                }
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(max);
                sink.send(TransportEvent::Reconnecting)
            }
        };
        if !delivered {
            warn!("Transport generation {} has no listener, stopping", sink.generation());
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> MonitorConfig {
        MonitorConfig {
            host: Some("10.0.0.5".into()),
            topic: "siteA".into(),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_settings_require_host() {
        assert!(BrokerSettings::from_config(&MonitorConfig::default()).is_none());
        let settings = BrokerSettings::from_config(&configured()).unwrap();
        assert_eq!(settings.host, "10.0.0.5");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.min_backoff, Duration::from_secs(5));
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_client_id_is_fresh_each_time() {
        let a = BrokerSettings::from_config(&configured()).unwrap();
        let b = BrokerSettings::from_config(&configured()).unwrap();
        assert_ne!(a.client_id, b.client_id);
        assert!(a.client_id.starts_with("watchtower-"));
    }

    #[test]
    fn test_empty_username_means_anonymous() {
        let mut config = configured();
        config.username = Some(String::new());
        assert_eq!(BrokerSettings::from_config(&config).unwrap().username, None);
    }

    #[test]
    fn test_factory_rejects_malformed_host() {
        let mut config = configured();
        config.host = Some("mqtt://broker".into());
        let settings = BrokerSettings::from_config(&config).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = RumqttFactory
            .connect(&settings, EventSink::new(1, tx))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidSettings(_)));
    }

    #[test]
    fn test_factory_needs_a_runtime() {
        let settings = BrokerSettings::from_config(&configured()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = RumqttFactory
            .connect(&settings, EventSink::new(1, tx))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::NoRuntime));
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(3, tx);
        assert!(sink.send(TransportEvent::Connected));
        drop(rx);
        assert!(!sink.send(TransportEvent::Connected));
    }
}
