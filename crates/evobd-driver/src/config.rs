//! Driver configuration
//!
//! Serde-backed configuration types for choosing and tuning a connection
//! backend. Binaries load these from TOML; the tagged representation keeps
//! config files explicit about the transport:
//!
//! ```toml
//! [connection]
//! type = "ble"
//! address = "D2:E0:2F:8D:5C:6B"
//! ```

use serde::{Deserialize, Serialize};

/// Connection backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Serial device (USB adapter or bound RFCOMM tty)
    Serial(SerialConfig),
    /// BLE GATT adapter
    Ble(BleConfig),
    /// Scripted mock for testing
    Mock(MockConfig),
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Serial backend configuration.
///
/// Direct USB adapters usually run at 38400 baud; RFCOMM bindings
/// (`/dev/rfcommN`) at 115200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`, `/dev/rfcomm0`, `COM3`)
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read deadline in milliseconds
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    38400
}

fn default_serial_timeout_ms() -> u64 {
    1000
}

/// BLE backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Adapter MAC address (e.g. `D2:E0:2F:8D:5C:6B`)
    pub address: String,
    /// Connect and read/write deadline in milliseconds
    #[serde(default = "default_ble_timeout_ms")]
    pub timeout_ms: u64,
    /// Restrict characteristic discovery to one service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uuid: Option<String>,
    /// Override the discovered notify characteristic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_uuid: Option<String>,
    /// Override the discovered write characteristic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_uuid: Option<String>,
    /// Largest single GATT write (negotiated MTU - 3)
    #[serde(default = "default_write_chunk")]
    pub write_chunk: usize,
}

fn default_ble_timeout_ms() -> u64 {
    10_000
}

fn default_write_chunk() -> usize {
    // ATT minimum MTU (23) minus the 3-byte write header
    20
}

/// Mock backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated per-command latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_defaults_apply() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            type = "serial"
            port = "/dev/ttyUSB0"
            "#,
        )
        .unwrap();
        match config {
            ConnectionConfig::Serial(cfg) => {
                assert_eq!(cfg.port, "/dev/ttyUSB0");
                assert_eq!(cfg.baud_rate, 38400);
                assert_eq!(cfg.timeout_ms, 1000);
            }
            other => panic!("expected serial config, got {other:?}"),
        }
    }

    #[test]
    fn ble_config_parses_overrides() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            type = "ble"
            address = "D2:E0:2F:8D:5C:6B"
            service_uuid = "e7810a71-73ae-499d-8c15-faa9aef0c3f2"
            write_chunk = 180
            "#,
        )
        .unwrap();
        match config {
            ConnectionConfig::Ble(cfg) => {
                assert_eq!(cfg.address, "D2:E0:2F:8D:5C:6B");
                assert_eq!(cfg.write_chunk, 180);
                assert!(cfg.notify_uuid.is_none());
            }
            other => panic!("expected BLE config, got {other:?}"),
        }
    }
}
