//! Error types for the Marstek-MQTT bridge
//!
//! Uses thiserror for ergonomic error definitions.
//! These errors can be converted to anyhow::Error in the main application.

use std::time::Duration;

/// Marstek device communication errors
///
/// The client never hands these to its callers directly: every variant except
/// `InvalidConfig` is logged and collapsed into a "no data" result.
#[derive(Debug, thiserror::Error)]
pub enum MarstekError {
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to resolve device address {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Failed to set up UDP socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("No UDP socket open")]
    NotConnected,

    #[error("Timeout waiting for '{method}' response from {host}:{port} after {timeout:?}")]
    Timeout {
        method: String,
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Device {host} reachable but port {port} is closed")]
    PortClosed { host: String, port: u16 },

    #[error("Failed to parse device response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Device returned error: {0}")]
    Device(serde_json::Value),

    #[error("Unknown ES mode: {0}")]
    UnknownMode(String),

    #[error("Failed to fetch data from device")]
    UpdateFailed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Classified failures of the one-shot registration check
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Cannot connect to Marstek device: {0}")]
    CannotConnect(String),

    #[error("Invalid Marstek device: {0}")]
    InvalidDevice(String),
}

/// MQTT connection and publishing errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Failed to publish message to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("Failed to serialize data: {error:?}")]
    SerializationError { error: serde_json::Error },

    #[error("MQTT client error: {0}")]
    ClientError(String),
}
