//! Byte-stream connections to ELM327 adapters
//!
//! This module provides the transport abstraction the engine is built on:
//! - Serial connection for USB adapters and bound RFCOMM devices
//! - BLE connection for GATT-based adapters (Vgate iCar Pro etc.)
//! - Mock connection for testing
//!
//! Every ELM327 response ends with the prompt byte `>` (0x3E), so
//! [`Connection::read_until`] is the primitive everything else relies on.

mod error;
pub mod ble;
pub mod mock;
pub mod serial;

pub use error::ConnectionError;

use std::time::Duration;

use crate::config::ConnectionConfig;

/// Transport-agnostic byte-stream interface to an ELM327 adapter.
///
/// Backends bridge whatever the underlying link looks like (a termios
/// device, asynchronous GATT notifications, a scripted table) into this
/// blocking contract. A backend must never buffer bytes in a way that
/// hides an already-received prompt from a later `read_until`.
pub trait Connection: Send {
    /// Acquire the underlying resource. Opening an open connection is a no-op.
    fn open(&mut self) -> Result<(), ConnectionError>;

    /// Release the underlying resource. Closing a closed connection is a no-op.
    fn close(&mut self) -> Result<(), ConnectionError>;

    /// Whether the connection is currently usable.
    fn is_open(&self) -> bool;

    /// Write all of `data` or fail.
    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError>;

    /// Read up to `size` bytes. Returns fewer bytes if the link goes quiet
    /// before `size` arrive, but never an empty buffer unless `size` is 0.
    fn read(&mut self, size: usize) -> Result<Vec<u8>, ConnectionError>;

    /// Accumulate bytes until `terminator` appears, returning everything up
    /// to and including it. On timeout the call fails with
    /// [`ConnectionError::Timeout`] and no partial data; the bytes received
    /// so far stay buffered for a retry.
    fn read_until(
        &mut self,
        terminator: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError>;

    /// Discard any buffered but unread bytes.
    fn flush_input(&mut self) -> Result<(), ConnectionError>;
}

/// Create a connection backend from configuration.
///
/// The returned connection is not yet open; `Elm327::initialize` (or an
/// explicit [`Connection::open`]) opens it.
pub fn create_connection(
    config: &ConnectionConfig,
) -> Result<Box<dyn Connection>, ConnectionError> {
    match config {
        ConnectionConfig::Serial(cfg) => Ok(Box::new(serial::SerialConnection::new(cfg.clone()))),
        ConnectionConfig::Ble(cfg) => Ok(Box::new(ble::BleConnection::new(cfg.clone())?)),
        ConnectionConfig::Mock(cfg) => Ok(Box::new(mock::MockConnection::new(cfg.clone()))),
    }
}

/// Search `haystack` for `needle`, returning the index of the first match.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subsequence_locates_prompt() {
        assert_eq!(find_subsequence(b"OK\r\r>", b">"), Some(4));
        assert_eq!(find_subsequence(b"OK\r\r", b">"), None);
        assert_eq!(find_subsequence(b"abc", b""), Some(0));
    }
}
