//! Kia Niro EV battery diagnostics
//!
//! Reads Battery Management System data over UDS ReadDataByIdentifier
//! (service 0x22, request CAN ID 0x7E4, responses from 0x7EC). Byte
//! offsets and scale factors follow the community-documented HKMC EV
//! PID tables (JejuSoul/OBD-PIDs-for-HKMC-EVs).

use super::VehicleError;
use crate::uds::UdsClient;

/// BMS request CAN ID.
pub const BMS_REQUEST_ID: u16 = 0x7E4;
/// BMS response CAN ID (informational; the engine matches by request).
pub const BMS_RESPONSE_ID: u16 = 0x7EC;

/// Main BMS data (SOC, pack voltage/current, temperatures)
pub const DID_BMS_MAIN: u16 = 0x0101;
/// Cell voltages 1-32
pub const DID_CELL_VOLTAGES_1: u16 = 0x0102;
/// Cell voltages 33-64
pub const DID_CELL_VOLTAGES_2: u16 = 0x0103;
/// Cell voltages 65-96
pub const DID_CELL_VOLTAGES_3: u16 = 0x0104;
/// Cells 97-98, SOH and related data
pub const DID_CELL_VOLTAGES_4: u16 = 0x0105;

/// Number of cells in the Niro EV pack.
pub const CELL_COUNT: u8 = 98;

/// Battery temperature readings in °C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryTemperatures {
    pub max: i16,
    pub min: i16,
    pub module_01: i16,
    pub module_02: i16,
    pub module_03: i16,
    pub module_04: i16,
    pub inlet: i16,
}

/// Kia Niro EV diagnostic interface over a UDS client.
pub struct KiaNiroEv {
    uds: UdsClient,
}

impl KiaNiroEv {
    pub fn new(uds: UdsClient) -> Self {
        Self { uds }
    }

    fn read_bms(&self, did: u16) -> Result<Vec<u8>, VehicleError> {
        Ok(self.uds.read_data_by_identifier(BMS_REQUEST_ID, did)?)
    }

    fn require(data: &[u8], len: usize) -> Result<(), VehicleError> {
        if data.len() < len {
            return Err(VehicleError::ShortResponse {
                expected: len,
                got: data.len(),
            });
        }
        Ok(())
    }

    /// State of Charge in percent (byte 4, scale 1/2).
    pub fn soc(&self) -> Result<f64, VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 5)?;
        Ok(data[4] as f64 / 2.0)
    }

    /// Pack DC voltage in volts (bytes 12-13, scale 1/10).
    pub fn battery_voltage(&self) -> Result<f64, VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 14)?;
        let raw = u16::from_be_bytes([data[12], data[13]]);
        Ok(raw as f64 / 10.0)
    }

    /// Pack current in amperes (signed bytes 10-11, scale 1/10).
    /// Positive while discharging, negative while charging.
    pub fn battery_current(&self) -> Result<f64, VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 12)?;
        let raw = i16::from_be_bytes([data[10], data[11]]);
        Ok(raw as f64 / 10.0)
    }

    /// Maximum cell voltage and its cell number (bytes 23-24).
    pub fn max_cell_voltage(&self) -> Result<(f64, u8), VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 25)?;
        Ok((data[23] as f64 / 50.0, data[24]))
    }

    /// Minimum cell voltage and its cell number (bytes 25-26).
    pub fn min_cell_voltage(&self) -> Result<(f64, u8), VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 27)?;
        Ok((data[25] as f64 / 50.0, data[26]))
    }

    /// Voltage of one cell (1-98), scale 1/50.
    ///
    /// Cells are spread over four DIDs: 32 per DID for 0x0102-0x0104,
    /// the final two at bytes 34-35 of 0x0105.
    pub fn cell_voltage(&self, cell: u8) -> Result<f64, VehicleError> {
        if cell < 1 || cell > CELL_COUNT {
            return Err(VehicleError::CellOutOfRange(cell));
        }
        let (did, index) = match cell {
            1..=32 => (DID_CELL_VOLTAGES_1, cell as usize + 3),
            33..=64 => (DID_CELL_VOLTAGES_2, (cell as usize - 32) + 3),
            65..=96 => (DID_CELL_VOLTAGES_3, (cell as usize - 64) + 3),
            _ => (DID_CELL_VOLTAGES_4, (cell as usize - 97) + 34),
        };
        let data = self.read_bms(did)?;
        Self::require(&data, index + 1)?;
        Ok(data[index] as f64 / 50.0)
    }

    /// State of Health in percent (DID 0x0105 bytes 25-26, scale 1/10).
    pub fn soh(&self) -> Result<f64, VehicleError> {
        let data = self.read_bms(DID_CELL_VOLTAGES_4)?;
        Self::require(&data, 27)?;
        let raw = u16::from_be_bytes([data[25], data[26]]);
        Ok(raw as f64 / 10.0)
    }

    /// Battery temperature readings (signed bytes 14-19 and 22).
    pub fn battery_temperatures(&self) -> Result<BatteryTemperatures, VehicleError> {
        let data = self.read_bms(DID_BMS_MAIN)?;
        Self::require(&data, 23)?;
        let signed = |b: u8| b as i8 as i16;
        Ok(BatteryTemperatures {
            max: signed(data[14]),
            min: signed(data[15]),
            module_01: signed(data[16]),
            module_02: signed(data[17]),
            module_03: signed(data[18]),
            module_04: signed(data[19]),
            inlet: signed(data[22]),
        })
    }
}
