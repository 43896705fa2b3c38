//! evobd-driver - ELM327-based OBD-II/UDS diagnostic driver
//!
//! This crate talks to a vehicle through an ELM327-class adapter reachable
//! over a serial device (USB or RFCOMM) or a BLE GATT link, and exposes a
//! blocking UDS request/response API on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       UdsClient                          │
//! │  read_data_by_identifier / tester_present                │
//! │                          │                               │
//! │                    ┌─────┴─────┐                         │
//! │                    │  Elm327   │  init handshake,        │
//! │                    │  engine   │  command lock,          │
//! │                    └─────┬─────┘  tester-present task    │
//! │                          │                               │
//! │              ┌───────────┴───────────┐                   │
//! │              │ response tokenizer +  │                   │
//! │              │ ISO-TP reassembler    │                   │
//! │              └───────────┬───────────┘                   │
//! │                          │                               │
//! │                 ┌────────┴────────┐                      │
//! │                 │   Connection    │                      │
//! │                 │ (serial/BLE/    │                      │
//! │                 │     mock)       │                      │
//! │                 └─────────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Vehicle-specific decoders (currently the Kia Niro EV battery module) sit
//! on top of [`UdsClient`] and only apply byte-offset formulas to payloads.

pub mod config;
pub mod connection;
pub mod elm327;
pub mod isotp;
pub mod uds;
pub mod vehicle;

pub use config::{BleConfig, ConnectionConfig, MockConfig, SerialConfig};
pub use connection::{create_connection, Connection, ConnectionError};
pub use connection::ble::{BleConnection, BleDeviceInfo};
pub use connection::mock::MockConnection;
pub use connection::serial::SerialConnection;
pub use elm327::{CanFrame, Elm327, Elm327Error};
pub use isotp::{parse_isotp_frames, IsoTpError, IsoTpFrame, IsoTpMessage};
pub use uds::{NegativeResponseCode, UdsClient, UdsResponse};
pub use vehicle::kia_niro_ev::KiaNiroEv;
pub use vehicle::VehicleError;
