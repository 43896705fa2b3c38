//! BLE connection for GATT-based ELM327 adapters
//!
//! BLE adapters (Vgate iCar Pro, IOS-Vlink and friends) expose the ELM327
//! byte stream through a GATT characteristic pair: the adapter pushes
//! received bytes as notifications and accepts writes on a write
//! characteristic. This backend bridges that packet-oriented, asynchronously
//! notifying link into the blocking [`Connection`] contract.
//!
//! A dedicated worker thread hosts a current-thread tokio runtime running
//! the btleplug client. Notifications are appended to a mutex-guarded RX
//! buffer; the foreground drains it with short poll sleeps. Writes are
//! posted to the worker over a channel and awaited under the caller's
//! timeout. `close` shuts the worker down and joins it, so pending calls
//! observe the closed state instead of hanging.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{find_subsequence, Connection, ConnectionError};
use crate::config::BleConfig;

/// Sleep between empty-buffer checks while waiting for notifications.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Advertised-name substrings that identify OBD-II adapters.
const OBD_NAME_PATTERNS: &[&str] = &["vgate", "vlink", "obd", "elm", "icar", "v-link", "ios-vlink"];

/// A BLE device seen during discovery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BleDeviceInfo {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
}

/// State shared between the notification producer and the reading consumer.
#[derive(Default)]
struct Shared {
    rx: Mutex<Vec<u8>>,
    open: AtomicBool,
}

enum Command {
    Write {
        data: Vec<u8>,
        reply: std_mpsc::Sender<Result<(), String>>,
    },
    Shutdown {
        reply: std_mpsc::Sender<()>,
    },
}

/// BLE connection to an ELM327 adapter, addressed by MAC.
pub struct BleConnection {
    config: BleConfig,
    service_uuid: Option<Uuid>,
    notify_uuid: Option<Uuid>,
    write_uuid: Option<Uuid>,
    shared: Arc<Shared>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl BleConnection {
    pub fn new(config: BleConfig) -> Result<Self, ConnectionError> {
        let parse = |field: &Option<String>, what: &str| -> Result<Option<Uuid>, ConnectionError> {
            field
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| ConnectionError::InvalidConfig(format!("{what}: {e}")))
        };
        let service_uuid = parse(&config.service_uuid, "service_uuid")?;
        let notify_uuid = parse(&config.notify_uuid, "notify_uuid")?;
        let write_uuid = parse(&config.write_uuid, "write_uuid")?;
        Ok(Self {
            config,
            service_uuid,
            notify_uuid,
            write_uuid,
            shared: Arc::new(Shared::default()),
            cmd_tx: None,
            worker: None,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Scan for advertising devices whose name looks like an OBD-II adapter.
    pub fn discover_obd_devices(timeout: Duration) -> Result<Vec<BleDeviceInfo>, ConnectionError> {
        let runtime = worker_runtime()?;
        runtime.block_on(async {
            let adapter = default_adapter().await?;
            adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(timeout).await;

            let mut found = Vec::new();
            for peripheral in adapter.peripherals().await? {
                let Some(props) = peripheral.properties().await.ok().flatten() else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };
                if is_obd_device_name(&name) {
                    found.push(BleDeviceInfo {
                        name,
                        address: peripheral.address().to_string(),
                        rssi: props.rssi,
                    });
                }
            }
            let _ = adapter.stop_scan().await;
            Ok(found)
        })
    }
}

impl Connection for BleConnection {
    fn open(&mut self) -> Result<(), ConnectionError> {
        if self.shared.open.load(Ordering::Acquire) && self.cmd_tx.is_some() {
            return Ok(());
        }

        // A fresh buffer per session; a stale one may hold bytes from a
        // link that no longer exists.
        self.shared = Arc::new(Shared::default());

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let shared = self.shared.clone();
        let setup = WorkerSetup {
            address: self.config.address.clone(),
            timeout: self.timeout(),
            write_chunk: self.config.write_chunk.max(1),
            service_uuid: self.service_uuid,
            notify_uuid: self.notify_uuid,
            write_uuid: self.write_uuid,
        };

        let handle = std::thread::Builder::new()
            .name("evobd-ble".to_string())
            .spawn(move || {
                let runtime = match worker_runtime() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(worker_main(setup, shared, cmd_rx, ready_tx));
            })
            .map_err(|e| ConnectionError::ConnectionFailed(format!("worker spawn: {e}")))?;

        // The worker needs scan + connect + service discovery time.
        let ready = ready_rx
            .recv_timeout(self.timeout() + Duration::from_secs(5))
            .map_err(|_| ConnectionError::Timeout);
        match ready {
            Ok(Ok(())) => {
                self.cmd_tx = Some(cmd_tx);
                self.worker = Some(handle);
                debug!(address = %self.config.address, "BLE connection open");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(e) => {
                // Worker may still be mid-connect; tell it to wind down.
                drop(cmd_tx);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let (reply_tx, reply_rx) = std_mpsc::channel();
            if cmd_tx
                .blocking_send(Command::Shutdown { reply: reply_tx })
                .is_ok()
            {
                let _ = reply_rx.recv_timeout(Duration::from_secs(2));
            }
        }
        self.shared.open.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        debug!(address = %self.config.address, "BLE connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        let cmd_tx = self.cmd_tx.as_ref().ok_or(ConnectionError::NotOpen)?;

        let (reply_tx, reply_rx) = std_mpsc::channel();
        cmd_tx
            .blocking_send(Command::Write {
                data: data.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| ConnectionError::NotOpen)?;

        match reply_rx.recv_timeout(self.timeout()) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Ble(e)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(ConnectionError::NotOpen),
        }
    }

    fn read(&mut self, size: usize) -> Result<Vec<u8>, ConnectionError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + self.timeout();
        loop {
            if !self.is_open() {
                return Err(ConnectionError::NotOpen);
            }
            {
                let mut rx = self.shared.rx.lock();
                if !rx.is_empty() {
                    let n = size.min(rx.len());
                    return Ok(rx.drain(..n).collect());
                }
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_until(
        &mut self,
        terminator: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ConnectionError> {
        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.timeout());
        loop {
            if !self.is_open() {
                return Err(ConnectionError::NotOpen);
            }
            {
                let mut rx = self.shared.rx.lock();
                if let Some(pos) = find_subsequence(&rx, terminator) {
                    let end = pos + terminator.len();
                    return Ok(rx.drain(..end).collect());
                }
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn flush_input(&mut self) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        self.shared.rx.lock().clear();
        Ok(())
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================================================
// Worker side
// ============================================================================

struct WorkerSetup {
    address: String,
    timeout: Duration,
    write_chunk: usize,
    service_uuid: Option<Uuid>,
    notify_uuid: Option<Uuid>,
    write_uuid: Option<Uuid>,
}

struct GattLink {
    peripheral: Peripheral,
    notify_char: Characteristic,
    write_char: Characteristic,
    write_type: WriteType,
}

fn worker_runtime() -> Result<tokio::runtime::Runtime, ConnectionError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ConnectionError::ConnectionFailed(format!("tokio runtime: {e}")))
}

async fn default_adapter() -> Result<Adapter, ConnectionError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ConnectionError::DeviceNotFound("no BLE adapter present".to_string()))
}

async fn worker_main(
    setup: WorkerSetup,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<Command>,
    ready_tx: std_mpsc::Sender<Result<(), ConnectionError>>,
) {
    let link = match connect(&setup).await {
        Ok(link) => link,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut notifications = match link.peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = link.peripheral.disconnect().await;
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    // Notification pump: the only producer for the shared RX buffer. The
    // stream ends when the peripheral disconnects, which flips `open` so
    // blocked readers fail instead of waiting forever.
    let pump_shared = shared.clone();
    let notify_uuid = link.notify_char.uuid;
    let pump = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != notify_uuid {
                continue;
            }
            trace!(len = notification.value.len(), "BLE notification");
            pump_shared.rx.lock().extend_from_slice(&notification.value);
        }
        warn!("BLE notification stream ended");
        pump_shared.open.store(false, Ordering::Release);
    });

    shared.open.store(true, Ordering::Release);
    let _ = ready_tx.send(Ok(()));

    let mut shutdown_ack = None;
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Write { data, reply } => {
                let mut result = Ok(());
                for chunk in data.chunks(setup.write_chunk) {
                    if let Err(e) = link
                        .peripheral
                        .write(&link.write_char, chunk, link.write_type)
                        .await
                    {
                        result = Err(e.to_string());
                        break;
                    }
                }
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                shutdown_ack = Some(reply);
                break;
            }
        }
    }

    // Reached on Shutdown or when the foreground dropped its sender.
    let _ = link.peripheral.unsubscribe(&link.notify_char).await;
    let _ = link.peripheral.disconnect().await;
    shared.open.store(false, Ordering::Release);
    pump.abort();
    if let Some(reply) = shutdown_ack {
        let _ = reply.send(());
    }
}

async fn connect(setup: &WorkerSetup) -> Result<GattLink, ConnectionError> {
    let adapter = default_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    let peripheral = match find_peripheral(&adapter, &setup.address, setup.timeout).await {
        Ok(p) => {
            let _ = adapter.stop_scan().await;
            p
        }
        Err(e) => {
            let _ = adapter.stop_scan().await;
            return Err(e);
        }
    };

    peripheral.connect().await?;
    if let Err(e) = peripheral.discover_services().await {
        let _ = peripheral.disconnect().await;
        return Err(e.into());
    }

    let (notify_char, write_char) = match select_characteristics(&peripheral.characteristics(), setup)
    {
        Ok(pair) => pair,
        Err(e) => {
            let _ = peripheral.disconnect().await;
            return Err(e);
        }
    };

    if let Err(e) = peripheral.subscribe(&notify_char).await {
        let _ = peripheral.disconnect().await;
        return Err(e.into());
    }

    let write_type = if write_char
        .properties
        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
    {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    };

    debug!(
        notify = %notify_char.uuid,
        write = %write_char.uuid,
        ?write_type,
        "GATT characteristics selected"
    );

    Ok(GattLink {
        peripheral,
        notify_char,
        write_char,
        write_type,
    })
}

async fn find_peripheral(
    adapter: &Adapter,
    address: &str,
    timeout: Duration,
) -> Result<Peripheral, ConnectionError> {
    let deadline = Instant::now() + timeout;
    loop {
        for peripheral in adapter.peripherals().await? {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(address)
            {
                return Ok(peripheral);
            }
        }
        if Instant::now() >= deadline {
            return Err(ConnectionError::DeviceNotFound(address.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Pick the RX (notify/indicate) and TX (write) characteristics.
///
/// Explicit UUID overrides win; otherwise a characteristic supporting both
/// directions is preferred, falling back to the first suitable of each.
fn select_characteristics(
    characteristics: &BTreeSet<Characteristic>,
    setup: &WorkerSetup,
) -> Result<(Characteristic, Characteristic), ConnectionError> {
    let in_scope = |c: &&Characteristic| match setup.service_uuid {
        Some(service) => c.service_uuid == service,
        None => true,
    };
    let notifies = |c: &Characteristic| {
        c.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    };
    let writes = |c: &Characteristic| {
        c.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    };

    let notify_char = match setup.notify_uuid {
        Some(uuid) => characteristics.iter().find(|c| c.uuid == uuid).cloned(),
        None => characteristics
            .iter()
            .filter(in_scope)
            .find(|c| notifies(c) && writes(c))
            .or_else(|| characteristics.iter().filter(in_scope).find(|c| notifies(c)))
            .cloned(),
    }
    .ok_or_else(|| ConnectionError::Ble("no notify characteristic found".to_string()))?;

    let write_char = match setup.write_uuid {
        Some(uuid) => characteristics.iter().find(|c| c.uuid == uuid).cloned(),
        None => {
            if writes(&notify_char) {
                Some(notify_char.clone())
            } else {
                characteristics
                    .iter()
                    .filter(in_scope)
                    .find(|c| writes(c))
                    .cloned()
            }
        }
    }
    .ok_or_else(|| ConnectionError::Ble("no write characteristic found".to_string()))?;

    Ok((notify_char, write_char))
}

/// Whether an advertised device name matches a known OBD-II adapter pattern.
pub fn is_obd_device_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    OBD_NAME_PATTERNS.iter().any(|p| lower.contains(p))
}
