//! Mock connection for testing
//!
//! Simulates an ELM327 adapter from a scripted command → response table.
//! The default table replays a trace recorded from a Kia Niro EV (SOC
//! 52.5%), so the full stack can be exercised without hardware.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::{find_subsequence, Connection, ConnectionError};
use crate::config::MockConfig;

/// Scripted mock ELM327 adapter.
pub struct MockConnection {
    config: MockConfig,
    open: bool,
    /// Command (without trailing CR) → raw adapter output (including prompt).
    responses: Vec<(String, String)>,
    rx: Vec<u8>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockConnection {
    /// Create a mock with the recorded Kia Niro EV response table.
    pub fn new(config: MockConfig) -> Self {
        Self::with_responses(config, Self::default_responses())
    }

    /// Create a mock with a caller-supplied response table.
    pub fn with_responses(config: MockConfig, responses: Vec<(String, String)>) -> Self {
        Self {
            config,
            open: false,
            responses,
            rx: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add (or override) a scripted response.
    pub fn add_response(&mut self, command: impl Into<String>, response: impl Into<String>) {
        let command = command.into();
        self.responses.retain(|(c, _)| *c != command);
        self.responses.push((command, response.into()));
    }

    /// Handle onto the log of commands written to this mock. The handle
    /// stays valid after the mock is moved into an engine.
    pub fn transcript(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    fn default_responses() -> Vec<(String, String)> {
        vec![
            ("ATZ".to_string(), "\r\rELM327 v1.5\r\r>".to_string()),
            ("ATE0".to_string(), "ATE0\rOK\r\r>".to_string()),
            ("ATL0".to_string(), "OK\r\r>".to_string()),
            ("ATS0".to_string(), "OK\r\r>".to_string()),
            ("ATH1".to_string(), "OK\r\r>".to_string()),
            ("ATSP0".to_string(), "OK\r\r>".to_string()),
            ("ATSH7E4".to_string(), "OK\r\r>".to_string()),
            // BMS main data; byte 4 of the payload is SOC*2 (0x69 -> 52.5%)
            (
                "220101".to_string(),
                "7EC 10 3E 62 01 01 EF FB E7 \r7EC 21 ED 69 00 00 00 00 00 \r\
                 7EC 22 00 00 0E 26 0D 0C 0D \r7EC 23 0D 0D 00 00 00 34 BC \r\
                 7EC 24 18 BC 56 00 00 7C 00 \r7EC 25 02 DE 80 00 02 C9 55 \r\
                 7EC 26 00 01 19 AF 00 01 07 \r7EC 27 C3 00 EC 65 6F 00 00 \r\
                 7EC 28 03 00 00 00 00 0B B8 \r\r>"
                    .to_string(),
            ),
            // Cell voltages 1-32
            (
                "220102".to_string(),
                "SEARCHING...\r7EC 10 27 62 01 02 FF FF FF \r7EC 21 FF BC BC BC BC BC BC \r\
                 7EC 22 BC BC BC BC BC BC BC \r7EC 23 BC BC BC BC BC BC BC \r\
                 7EC 24 BC BC BC BC BC BC BC \r7EC 25 BC BC BC BC BC AA AA \r\r>"
                    .to_string(),
            ),
            // Cells 97-98, SOH and related data
            (
                "220105".to_string(),
                "7EC 10 2E 62 01 05 FF FF 0B \r7EC 21 74 0F 01 2C 01 01 2C \r\
                 7EC 22 0B 0B 0C 0B 0C 0C 0C \r7EC 23 3E 90 43 82 00 00 64 \r\
                 7EC 24 0E 00 03 E8 21 39 A0 \r7EC 25 00 67 00 00 00 00 00 \r\
                 7EC 26 00 00 0C 0C 0D 0D AA \r\r>"
                    .to_string(),
            ),
        ]
    }
}

impl Connection for MockConnection {
    fn open(&mut self) -> Result<(), ConnectionError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        self.open = false;
        self.rx.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if !self.open {
            return Err(ConnectionError::NotOpen);
        }
        if self.config.latency_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.latency_ms));
        }

        let command = String::from_utf8_lossy(data).trim().to_string();
        trace!(%command, "Mock received command");
        self.sent.lock().push(command.clone());

        let response = self
            .responses
            .iter()
            .find(|(c, _)| *c == command)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| "?\r\r>".to_string());
        self.rx.extend_from_slice(response.as_bytes());
        Ok(())
    }

    fn read(&mut self, size: usize) -> Result<Vec<u8>, ConnectionError> {
        if !self.open {
            return Err(ConnectionError::NotOpen);
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        if self.rx.is_empty() {
            return Err(ConnectionError::Timeout);
        }
        let n = size.min(self.rx.len());
        Ok(self.rx.drain(..n).collect())
    }

    fn read_until(
        &mut self,
        terminator: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError> {
        if !self.open {
            return Err(ConnectionError::NotOpen);
        }
        match find_subsequence(&self.rx, terminator) {
            Some(pos) => {
                let end = pos + terminator.len();
                Ok(self.rx.drain(..end).collect())
            }
            None => Err(ConnectionError::Timeout),
        }
    }

    fn flush_input(&mut self) -> Result<(), ConnectionError> {
        self.rx.clear();
        Ok(())
    }
}
