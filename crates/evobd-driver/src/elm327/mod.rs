//! ELM327 command/response engine
//!
//! Drives the adapter through its initialization handshake, transmits UDS
//! requests as hex command strings, and turns the adapter's textual frame
//! dumps back into reassembled UDS payloads.
//!
//! The adapter's request/response channel is strictly serial: one mutex
//! around the connection and the active CAN header serializes foreground
//! commands and tester-present ticks.

mod error;
mod response;

pub use error::Elm327Error;
pub use response::CanFrame;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionError};
use crate::isotp::{IsoTpFrame, IsoTpMessage};
use crate::uds::UdsResponse;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Prompt byte the adapter emits when ready for the next command.
const PROMPT: &[u8] = b">";

/// UDS TesterPresent (0x3E) with sub-function 0x00 as a raw hex command.
const TESTER_PRESENT_COMMAND: &str = "3E00";

/// Sleep granularity of the keep-alive loop; bounds how long `stop` waits.
const KEEPALIVE_POLL: Duration = Duration::from_millis(50);

/// Initialization handshake, in order. `ATZ` runs first and its banner is
/// ignored; `ATH1` is mandatory because the tokenizer needs per-frame CAN
/// IDs.
const INIT_COMMANDS: &[&str] = &["ATE0", "ATL0", "ATS0", "ATH1", "ATSP0"];

/// Connection plus the engine state it protects. Locking this is the
/// command lock: whoever holds it owns the adapter channel.
struct Link {
    connection: Box<dyn Connection>,
    /// CAN request header last set via `ATSH`.
    active_header: Option<u16>,
}

struct KeepaliveTask {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// ELM327 engine over any [`Connection`] backend.
pub struct Elm327 {
    link: Arc<Mutex<Link>>,
    timeout: Duration,
    keepalive: Mutex<Option<KeepaliveTask>>,
    /// Set by the keep-alive task when it dies on a connection error;
    /// drained as a warning by the next foreground call.
    keepalive_fault: Arc<Mutex<Option<String>>>,
}

impl Elm327 {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            link: Arc::new(Mutex::new(Link {
                connection,
                active_header: None,
            })),
            timeout: DEFAULT_TIMEOUT,
            keepalive: Mutex::new(None),
            keepalive_fault: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the connection and run the initialization handshake:
    /// `ATZ`, `ATE0`, `ATL0`, `ATS0`, `ATH1`, `ATSP0`.
    pub fn initialize(&self) -> Result<(), Elm327Error> {
        let mut link = self.link.lock();
        link.connection.open()?;
        link.connection.flush_input()?;

        // Reset. The reply is a version banner, not OK; only the prompt
        // matters here.
        Self::command(&mut link, "ATZ", self.timeout)?;

        for cmd in INIT_COMMANDS {
            let reply = Self::command(&mut link, cmd, self.timeout)?;
            if let Some(token) = response::find_error_token(&reply) {
                return Err(Elm327Error::NoResponse(token));
            }
        }

        link.active_header = None;
        info!("ELM327 initialized");
        Ok(())
    }

    /// Send a raw command and return the adapter's reply with the prompt
    /// and surrounding whitespace stripped.
    pub fn send_command(&self, cmd: &str) -> Result<String, Elm327Error> {
        self.surface_keepalive_fault();
        let mut link = self.link.lock();
        Self::command(&mut link, cmd, self.timeout)
    }

    /// Send a UDS request to `can_id` and reassemble the response.
    ///
    /// Switches the adapter's CAN header via `ATSH` when `can_id` differs
    /// from the active one; the switch and the request happen under a
    /// single command-lock acquisition.
    pub fn send_uds_message(
        &self,
        can_id: u16,
        service: u8,
        data: &[u8],
    ) -> Result<UdsResponse, Elm327Error> {
        if can_id > 0x7FF {
            return Err(Elm327Error::InvalidRequest(format!(
                "CAN ID 0x{can_id:X} does not fit 11 bits"
            )));
        }
        self.surface_keepalive_fault();

        let mut link = self.link.lock();
        if link.active_header != Some(can_id) {
            let header_cmd = format!("ATSH{can_id:03X}");
            let reply = Self::command(&mut link, &header_cmd, self.timeout)?;
            if let Some(token) = response::find_error_token(&reply) {
                return Err(Elm327Error::NoResponse(token));
            }
            if !reply.contains("OK") {
                return Err(Elm327Error::Parse(format!(
                    "unexpected reply to {header_cmd}: '{reply}'"
                )));
            }
            link.active_header = Some(can_id);
        }

        let request = format!("{service:02X}{}", hex::encode_upper(data));
        let text = Self::command(&mut link, &request, self.timeout)?;
        drop(link);

        let frames = response::split_frames(&text, &request)?;
        let mut message = IsoTpMessage::new();
        for frame in &frames {
            message.absorb(IsoTpFrame::parse(&frame.data)?)?;
        }
        let payload = message.into_payload()?;

        UdsResponse::from_payload(payload, service)
    }

    /// CAN request header currently programmed into the adapter.
    pub fn active_header(&self) -> Option<u16> {
        self.link.lock().active_header
    }

    /// Discard any unread adapter output. Recovery step after a timeout
    /// left the adapter mid-response.
    pub fn flush_input(&self) -> Result<(), Elm327Error> {
        let mut link = self.link.lock();
        link.connection.flush_input()?;
        Ok(())
    }

    /// Start the cyclic TesterPresent keep-alive.
    ///
    /// Ticks are serialized through the command lock; a tick that finds the
    /// lock taken is skipped, not queued. A tick failing with a connection
    /// error disables the task and is surfaced as a warning by the next
    /// foreground call.
    pub fn start_tester_present(&self, period: Duration) {
        let mut slot = self.keepalive.lock();
        if let Some(task) = slot.as_ref() {
            if !task.handle.is_finished() {
                debug!("Tester present already running");
                return;
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let link = self.link.clone();
        let fault = self.keepalive_fault.clone();
        let flag = running.clone();
        let timeout = self.timeout;

        let spawned = std::thread::Builder::new()
            .name("evobd-tester-present".to_string())
            .spawn(move || keepalive_loop(link, flag, fault, period, timeout));
        match spawned {
            Ok(handle) => {
                *slot = Some(KeepaliveTask { running, handle });
                debug!(period_ms = period.as_millis() as u64, "Tester present started");
            }
            Err(e) => warn!(?e, "Failed to spawn tester present thread"),
        }
    }

    /// Stop the keep-alive. The task has observably quiesced on return.
    pub fn stop_tester_present(&self) {
        let task = self.keepalive.lock().take();
        if let Some(task) = task {
            task.running.store(false, Ordering::Relaxed);
            let _ = task.handle.join();
            debug!("Tester present stopped");
        }
    }

    /// Stop background work and close the connection.
    pub fn close(&self) -> Result<(), Elm327Error> {
        self.stop_tester_present();
        let mut link = self.link.lock();
        link.connection.close()?;
        Ok(())
    }

    fn command(link: &mut Link, cmd: &str, timeout: Duration) -> Result<String, Elm327Error> {
        trace!(%cmd, "TX");
        let mut bytes = Vec::with_capacity(cmd.len() + 1);
        bytes.extend_from_slice(cmd.as_bytes());
        bytes.push(b'\r');
        link.connection.write(&bytes)?;

        let raw = link.connection.read_until(PROMPT, Some(timeout))?;
        let text = String::from_utf8_lossy(&raw);
        let reply = text.trim_end_matches('>').trim().to_string();
        trace!(%reply, "RX");
        Ok(reply)
    }

    fn surface_keepalive_fault(&self) {
        if let Some(fault) = self.keepalive_fault.lock().take() {
            warn!(%fault, "Tester present keep-alive disabled after connection error");
        }
    }
}

impl Drop for Elm327 {
    fn drop(&mut self) {
        self.stop_tester_present();
        let _ = self.link.lock().connection.close();
    }
}

fn keepalive_loop(
    link: Arc<Mutex<Link>>,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<String>>>,
    period: Duration,
    timeout: Duration,
) {
    while running.load(Ordering::Relaxed) {
        match link.try_lock() {
            Some(mut link) => {
                match Elm327::command(&mut link, TESTER_PRESENT_COMMAND, timeout) {
                    // Response content does not matter for a keep-alive.
                    Ok(_) => trace!("Tester present tick"),
                    Err(Elm327Error::Connection(ConnectionError::Timeout)) => {
                        debug!("Tester present tick timed out")
                    }
                    Err(Elm327Error::Connection(e)) => {
                        warn!(%e, "Tester present failed, disabling keep-alive");
                        *fault.lock() = Some(e.to_string());
                        running.store(false, Ordering::Relaxed);
                        break;
                    }
                    Err(e) => trace!(%e, "Tester present reply ignored"),
                }
            }
            None => debug!("Tester present tick skipped, command in flight"),
        }

        let deadline = Instant::now() + period;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(KEEPALIVE_POLL.min(deadline - now));
        }
    }
}
