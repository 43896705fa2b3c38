//! Vehicle-specific decoders
//!
//! These modules apply byte-offset formulas to UDS payloads; all wire-level
//! work stays in the engine below them.

pub mod kia_niro_ev;

use thiserror::Error;

use crate::elm327::Elm327Error;

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error(transparent)]
    Uds(#[from] Elm327Error),

    #[error("Response too short: expected at least {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },

    #[error("Cell number out of range: {0} (valid 1-98)")]
    CellOutOfRange(u8),
}
