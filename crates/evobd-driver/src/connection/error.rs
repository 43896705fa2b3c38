//! Connection layer errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection is not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Read timed out")]
    Timeout,

    #[error("BLE error: {0}")]
    Ble(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No matching device found: {0}")]
    DeviceNotFound(String),
}

impl From<btleplug::Error> for ConnectionError {
    fn from(err: btleplug::Error) -> Self {
        ConnectionError::Ble(err.to_string())
    }
}

impl From<serialport::Error> for ConnectionError {
    fn from(err: serialport::Error) -> Self {
        ConnectionError::ConnectionFailed(err.to_string())
    }
}
