//! Marstek to MQTT Bridge
//!
//! A client for the Marstek home battery local UDP/JSON API, plus an MQTT
//! bridge that polls the device and exposes its state and ES mode selection.

pub mod config;
pub mod errors;
pub mod marstek;
pub mod mqtt;

pub use config::Config;
pub use marstek::client::MarstekClient;
pub use mqtt::publisher::MqttPublisher;
