//! ELM327 engine errors

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::isotp::IsoTpError;
use crate::uds::NegativeResponseCode;

#[derive(Debug, Error)]
pub enum Elm327Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Adapter reported: {0}")]
    NoResponse(String),

    #[error("Malformed adapter response: {0}")]
    Parse(String),

    #[error(transparent)]
    IsoTp(#[from] IsoTpError),

    #[error("Negative response for service 0x{service:02X}: {nrc} (NRC 0x{nrc:02X})")]
    NegativeResponse {
        service: u8,
        nrc: NegativeResponseCode,
    },

    #[error("Unexpected service echo: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedService { expected: u8, actual: u8 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
