//! MQTT presentation layer
//!
//! Maps device snapshots to retained MQTT topics and receives mode commands.

pub mod context;
pub mod publisher;
pub mod types;

pub use publisher::MqttPublisher;
pub use types::{DeviceInfo, SensorState};
