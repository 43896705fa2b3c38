//! Kia Niro EV decoder tests against the recorded BMS trace.

use std::sync::Arc;

use evobd_driver::config::MockConfig;
use evobd_driver::{Elm327, KiaNiroEv, MockConnection, UdsClient, VehicleError};

fn kia(mock: MockConnection) -> KiaNiroEv {
    let engine = Elm327::new(Box::new(mock));
    engine.initialize().unwrap();
    KiaNiroEv::new(UdsClient::new(Arc::new(engine)))
}

fn kia_with_default_trace() -> KiaNiroEv {
    kia(MockConnection::new(MockConfig::default()))
}

#[test]
fn soc_from_recorded_trace_is_52_5_percent() {
    assert_eq!(kia_with_default_trace().soc().unwrap(), 52.5);
}

#[test]
fn battery_voltage_from_recorded_trace() {
    // Bytes 12-13 are 0x0E 0x26: 3622 / 10 = 362.2 V
    let voltage = kia_with_default_trace().battery_voltage().unwrap();
    assert!((voltage - 362.2).abs() < 1e-9);
}

#[test]
fn battery_current_is_zero_at_standstill() {
    assert_eq!(kia_with_default_trace().battery_current().unwrap(), 0.0);
}

#[test]
fn min_max_cell_voltages_from_recorded_trace() {
    let kia = kia_with_default_trace();
    let (max_v, max_cell) = kia.max_cell_voltage().unwrap();
    let (min_v, min_cell) = kia.min_cell_voltage().unwrap();
    assert_eq!(max_v, 0xBC as f64 / 50.0);
    assert_eq!(max_cell, 24);
    assert_eq!(min_v, 0xBC as f64 / 50.0);
    assert_eq!(min_cell, 86);
}

#[test]
fn cell_voltages_in_first_bank() {
    let kia = kia_with_default_trace();
    // All cells in the recorded trace sit at 0xBC: 188 / 50 = 3.76 V
    assert_eq!(kia.cell_voltage(1).unwrap(), 3.76);
    assert_eq!(kia.cell_voltage(32).unwrap(), 3.76);
}

#[test]
fn cell_number_bounds_are_enforced() {
    let kia = kia_with_default_trace();
    assert!(matches!(
        kia.cell_voltage(0),
        Err(VehicleError::CellOutOfRange(0))
    ));
    assert!(matches!(
        kia.cell_voltage(99),
        Err(VehicleError::CellOutOfRange(99))
    ));
}

#[test]
fn battery_temperatures_from_recorded_trace() {
    let temps = kia_with_default_trace().battery_temperatures().unwrap();
    assert_eq!(temps.max, 13);
    assert_eq!(temps.min, 12);
    assert_eq!(temps.module_01, 13);
    assert_eq!(temps.module_04, 0);
    assert_eq!(temps.inlet, 0x34);
}

#[test]
fn soh_decodes_scaled_word() {
    let mut mock = MockConnection::new(MockConfig::default());
    // 30-byte payload with SOH word 0x03E8 at data bytes 25-26 -> 100.0%
    mock.add_response(
        "220105",
        "7EC 10 1E 62 01 05 00 00 00 \r7EC 21 00 00 00 00 00 00 00 \r\
         7EC 22 00 00 00 00 00 00 00 \r7EC 23 00 00 00 00 00 00 00 \r\
         7EC 24 00 03 E8 AA AA AA AA \r\r>",
    );
    let kia = kia(mock);
    assert_eq!(kia.soh().unwrap(), 100.0);
}

#[test]
fn short_bms_response_is_rejected() {
    let mut mock = MockConnection::new(MockConfig::default());
    // Single frame: 62 01 01 + a lone data byte
    mock.add_response("220101", "7EC 04 62 01 01 69 \r\r>");
    let kia = kia(mock);
    match kia.soc() {
        Err(VehicleError::ShortResponse { expected, got }) => {
            assert_eq!(expected, 5);
            assert_eq!(got, 1);
        }
        other => panic!("expected ShortResponse, got {other:?}"),
    }
}
