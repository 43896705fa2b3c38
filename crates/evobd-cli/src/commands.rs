//! CLI command implementations

use std::time::Duration;

use anyhow::{Context, Result};
use evobd_driver::{BleConnection, KiaNiroEv, SerialConnection, UdsClient};
use tracing::warn;

/// Scan for BLE OBD adapters and print what was found.
pub fn scan(timeout: Duration) -> Result<()> {
    println!("Scanning for BLE OBD adapters ({}s)...", timeout.as_secs());
    let devices = BleConnection::discover_obd_devices(timeout)
        .context("BLE scan failed")?;

    if devices.is_empty() {
        println!("No OBD adapters found.");
        return Ok(());
    }
    for device in devices {
        match device.rssi {
            Some(rssi) => println!("{}  {}  ({} dBm)", device.address, device.name, rssi),
            None => println!("{}  {}", device.address, device.name),
        }
    }
    Ok(())
}

/// List serial ports that could host an adapter.
pub fn ports() -> Result<()> {
    let ports = SerialConnection::list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Print the state of charge.
pub fn soc(kia: &KiaNiroEv) -> Result<()> {
    let soc = kia.soc().context("Failed to read SOC")?;
    println!("SOC: {soc:.1} %");
    Ok(())
}

/// Print a full battery report.
pub fn battery(kia: &KiaNiroEv) -> Result<()> {
    let soc = kia.soc().context("Failed to read SOC")?;
    let voltage = kia.battery_voltage()?;
    let current = kia.battery_current()?;
    println!("SOC:       {soc:.1} %");
    println!("Voltage:   {voltage:.1} V");
    println!("Current:   {current:.1} A");
    println!("Power:     {:.2} kW", voltage * current / 1000.0);

    match kia.soh() {
        Ok(soh) => println!("SOH:       {soh:.1} %"),
        Err(e) => warn!(%e, "SOH read failed"),
    }

    let (max_v, max_cell) = kia.max_cell_voltage()?;
    let (min_v, min_cell) = kia.min_cell_voltage()?;
    println!("Max cell:  {max_v:.2} V (cell {max_cell})");
    println!("Min cell:  {min_v:.2} V (cell {min_cell})");

    let temps = kia.battery_temperatures()?;
    println!(
        "Temps:     max {} °C, min {} °C, inlet {} °C",
        temps.max, temps.min, temps.inlet
    );
    println!(
        "Modules:   {} / {} / {} / {} °C",
        temps.module_01, temps.module_02, temps.module_03, temps.module_04
    );
    Ok(())
}

/// Print one cell voltage.
pub fn cell(kia: &KiaNiroEv, cell: u8) -> Result<()> {
    let voltage = kia
        .cell_voltage(cell)
        .with_context(|| format!("Failed to read cell {cell}"))?;
    println!("Cell {cell}: {voltage:.2} V");
    Ok(())
}

/// Raw ReadDataByIdentifier against an arbitrary ECU.
pub fn read(client: &UdsClient, can_id: &str, did: &str) -> Result<()> {
    let can_id = parse_hex_u16(can_id).context("Invalid CAN ID")?;
    let did = parse_hex_u16(did).context("Invalid data identifier")?;

    let payload = client
        .read_data_by_identifier(can_id, did)
        .with_context(|| format!("Read 0x{did:04X} from 0x{can_id:03X} failed"))?;
    println!("{}", hex::encode_upper(&payload));
    Ok(())
}

/// Poll SOC at a fixed interval until interrupted.
pub fn monitor(kia: &KiaNiroEv, interval: Duration) -> Result<()> {
    loop {
        match kia.soc() {
            Ok(soc) => println!("SOC: {soc:.1} %"),
            Err(e) => warn!(%e, "SOC poll failed"),
        }
        std::thread::sleep(interval);
    }
}

/// Parse a u16 from hex with or without a `0x` prefix.
fn parse_hex_u16(s: &str) -> Result<u16> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(trimmed, 16).with_context(|| format!("not a hex number: '{s}'"))
}
