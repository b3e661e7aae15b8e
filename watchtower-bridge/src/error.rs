//! Error types for the bridge core.
//!
//! None of these ever cross a timer task or a transport callback: they are
//! logged and folded into a reported status instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a configuration directory")]
    NoConfigDir,
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid broker settings: {0}")]
    InvalidSettings(String),
    #[error("no async runtime available to drive the MQTT event loop")]
    NoRuntime,
    #[error("MQTT request rejected: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT event loop is no longer running")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe command failed to start: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("probe timed out after {0}s")]
    Timeout(u64),
    #[error("probe unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("configuration could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("bridge has been shut down")]
    ShutDown,
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
