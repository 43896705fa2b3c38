//! Serial connection for USB and RFCOMM-bound ELM327 adapters
//!
//! A thin wrapper over a serial device. RFCOMM Bluetooth adapters are
//! reached through the same path once bound to `/dev/rfcommN` (typically
//! at 115200 baud, versus 38400 for direct USB adapters).

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use super::{find_subsequence, Connection, ConnectionError};
use crate::config::SerialConfig;

/// How long a single blocking read on the device may stall before the
/// deadline loop gets a chance to re-check.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial port connection to an ELM327 adapter.
pub struct SerialConnection {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    /// Bytes received but not yet claimed by a read. Survives a timed-out
    /// `read_until` so the prompt stays discoverable on retry.
    pending: Vec<u8>,
}

impl SerialConnection {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            pending: Vec::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Pull whatever the device has into `pending`. Returns the number of
    /// new bytes, treating a poll timeout as zero.
    fn fill_pending(&mut self) -> Result<usize, ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotOpen)?;
        let mut buf = [0u8; 256];
        match port.read(&mut buf) {
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }

    /// List available serial port paths.
    pub fn list_ports() -> Result<Vec<String>, ConnectionError> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    /// Probe available serial ports for an ELM327 by sending `ATZ` and
    /// checking the reset banner.
    pub fn detect_port(baud_rate: u32, timeout: Duration) -> Result<String, ConnectionError> {
        for path in Self::list_ports()? {
            debug!(port = %path, "Probing for ELM327");
            let mut conn = SerialConnection::new(SerialConfig {
                port: path.clone(),
                baud_rate,
                timeout_ms: timeout.as_millis() as u64,
            });
            if conn.open().is_err() {
                continue;
            }
            if conn.write(b"ATZ\r").is_err() {
                continue;
            }
            let banner = match conn.read_until(b">", Some(timeout)) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => continue,
            };
            let _ = conn.close();
            if banner.contains("ELM") {
                debug!(port = %path, "Found ELM327 adapter");
                return Ok(path);
            }
        }
        Err(ConnectionError::DeviceNotFound(
            "no ELM327 adapter on any serial port".to_string(),
        ))
    }
}

impl Connection for SerialConnection {
    fn open(&mut self) -> Result<(), ConnectionError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!(
                    "failed to open {}: {}",
                    self.config.port, e
                ))
            })?;
        debug!(port = %self.config.port, baud = self.config.baud_rate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if self.port.take().is_some() {
            debug!(port = %self.config.port, "Serial port closed");
        }
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotOpen)?;
        trace!(len = data.len(), "Serial write");
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, size: usize) -> Result<Vec<u8>, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + self.timeout();
        while self.pending.is_empty() {
            self.fill_pending()?;
            if !self.pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout);
            }
        }

        let n = size.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn read_until(
        &mut self,
        terminator: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }

        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.timeout());
        loop {
            if let Some(pos) = find_subsequence(&self.pending, terminator) {
                let end = pos + terminator.len();
                return Ok(self.pending.drain(..end).collect());
            }
            if Instant::now() >= deadline {
                trace!(buffered = self.pending.len(), "read_until deadline reached");
                return Err(ConnectionError::Timeout);
            }
            self.fill_pending()?;
        }
    }

    fn flush_input(&mut self) -> Result<(), ConnectionError> {
        self.pending.clear();
        let port = self.port.as_mut().ok_or(ConnectionError::NotOpen)?;
        port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
