//! Publisher configuration

use anyhow::{Context, Result};
use evobd_driver::ConnectionConfig;
use serde::Deserialize;
use std::path::Path;

/// Top-level publisher configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    /// Adapter connection
    pub connection: ConnectionConfig,
}

/// MQTT broker and topic settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic for the SOC value (retained)
    #[serde(default = "default_soc_topic")]
    pub soc_topic: String,
    /// Topic for the timestamp of the last successful reading (retained)
    #[serde(default = "default_timestamp_topic")]
    pub timestamp_topic: String,
    /// Online/offline availability topic (retained, with last will)
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,
    /// Optional topic that enables ("on"/"1"/"true") or disables polling
    #[serde(default)]
    pub trigger_topic: Option<String>,
}

/// Poll loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Whether polling runs before any trigger message arrives
    #[serde(default = "default_start_enabled")]
    pub start_enabled: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            start_enabled: default_start_enabled(),
        }
    }
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "evobd-soc-publisher".to_string()
}

fn default_soc_topic() -> String {
    "evobd/soc".to_string()
}

fn default_timestamp_topic() -> String {
    "evobd/soc/last_update".to_string()
}

fn default_availability_topic() -> String {
    "evobd/availability".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_start_enabled() -> bool {
    true
}

impl PublisherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: PublisherConfig = toml::from_str(
            r#"
            [mqtt]
            broker = "broker.local"

            [connection]
            type = "mock"
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.soc_topic, "evobd/soc");
        assert_eq!(config.polling.interval_secs, 60);
        assert!(config.polling.start_enabled);
        assert!(config.mqtt.trigger_topic.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config: PublisherConfig = toml::from_str(
            r#"
            [mqtt]
            broker = "10.0.0.2"
            port = 8883
            username = "ha"
            password = "secret"
            soc_topic = "niro/soc"
            trigger_topic = "niro/poll"

            [polling]
            interval_secs = 300
            start_enabled = false

            [connection]
            type = "ble"
            address = "D2:E0:2F:8D:5C:6B"
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.trigger_topic.as_deref(), Some("niro/poll"));
        assert_eq!(config.polling.interval_secs, 300);
        assert!(!config.polling.start_enabled);
    }
}
