//! Configuration module for the Marstek-MQTT bridge
//!
//! Loads configuration from a TOML file:
//! - [default] - General settings (log_level)
//! - [marstek] - Device connection and polling settings
//! - [mqtt] - MQTT broker settings

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::marstek::command::DEFAULT_PORT;

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    pub marstek: MarstekConfig,
    pub mqtt: MqttConfig,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Marstek device configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MarstekConfig {
    /// Device hostname or IP address (required)
    pub host: String,

    /// Device UDP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Local UDP port to bind; defaults to `port`
    pub local_port: Option<u16>,

    /// Per-request response timeout (e.g., "3s", "500ms")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Polling interval (e.g., "30s", "1m")
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl MarstekConfig {
    pub fn local_port(&self) -> u16 {
        self.local_port.unwrap_or(self.port)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

/// MQTT broker configuration
#[derive(Deserialize, Clone)]
pub struct MqttConfig {
    /// MQTT root topic (e.g., "marstek")
    #[serde(default = "default_mqtt_root")]
    pub root: String,

    /// MQTT broker hostname
    pub host: Option<String>,

    /// MQTT broker port (default 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Unix domain socket path, takes precedence over host
    pub socket: Option<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

fn default_mqtt_root() -> String {
    "marstek".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("root", &self.root)
            .finish()
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        if self.marstek.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "marstek.host must not be empty".to_string(),
            ));
        }

        if self.marstek.port == 0 {
            return Err(ConfigError::ValidationError(
                "marstek.port must not be 0".to_string(),
            ));
        }

        if self.marstek.timeout.is_zero() || self.marstek.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "marstek.timeout and marstek.interval must be greater than zero".to_string(),
            ));
        }

        let has_host = self.mqtt.host.as_deref().is_some_and(|h| !h.is_empty());
        if !has_host && self.mqtt.socket.is_none() {
            return Err(ConfigError::ValidationError(
                "mqtt.host or mqtt.socket must be set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let default = DefaultConfig::default();
        assert_eq!(default.log_level, LogLevel::Info);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_str = r#"
            [marstek]
            host = "192.168.1.50"

            [mqtt]
            host = "broker"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.marstek.port, 30000);
        assert_eq!(config.marstek.local_port(), 30000);
        assert_eq!(config.marstek.timeout, Duration::from_secs(3));
        assert_eq!(config.marstek.interval, Duration::from_secs(30));
        assert_eq!(config.mqtt.root, "marstek");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_log_level_and_durations() {
        let toml_str = r#"
            [default]
            log_level = "DEBUG"

            [marstek]
            host = "test"
            port = 30001
            local_port = 40000
            timeout = "500ms"
            interval = "1m"

            [mqtt]
            socket = "/run/mosquitto.sock"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.default.log_level, LogLevel::Debug);
        assert_eq!(config.marstek.local_port(), 40000);
        assert_eq!(config.marstek.timeout, Duration::from_millis(500));
        assert_eq!(config.marstek.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_missing_broker() {
        let toml_str = r#"
            [marstek]
            host = "test"

            [mqtt]
            username = "u"
        "#;

        let err = Config::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validation_rejects_empty_host() {
        let toml_str = r#"
            [marstek]
            host = ""

            [mqtt]
            host = "broker"
        "#;

        assert!(matches!(
            Config::from_toml(toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
