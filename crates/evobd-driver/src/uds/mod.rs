//! UDS (ISO 14229) request/response layer
//!
//! Thin facade over the ELM327 engine: builds requests, validates the
//! positive-response convention (`service | 0x40`), and splits off the
//! data identifier for services that carry one.

mod nrc;

pub use nrc::NegativeResponseCode;

use std::sync::Arc;

use tracing::debug;

use crate::elm327::{Elm327, Elm327Error};

/// ReadDataByIdentifier (0x22)
pub const READ_DATA_BY_ID: u8 = 0x22;
/// TesterPresent (0x3E)
pub const TESTER_PRESENT: u8 = 0x3E;
/// Leading byte of every negative response
pub const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Services whose payload starts with a 2-byte data identifier, in both
/// request and positive-response form (0x22/0x62 ReadDataByIdentifier,
/// 0x2E/0x6E WriteDataByIdentifier, 0x2F/0x6F IOControlByIdentifier).
const DID_SERVICES: &[u8] = &[0x22, 0x62, 0x2E, 0x6E, 0x2F, 0x6F];

/// A validated, reassembled UDS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsResponse {
    /// First byte of the payload; equals `request_service | 0x40`.
    pub service_echo: u8,
    /// 2-byte big-endian identifier, present for DID-bearing services.
    pub data_identifier: Option<u16>,
    /// Payload with the echo and data identifier stripped.
    pub payload: Vec<u8>,
}

impl UdsResponse {
    /// Validate a reassembled payload against the service that was
    /// requested.
    pub fn from_payload(payload: Vec<u8>, request_service: u8) -> Result<Self, Elm327Error> {
        let service_echo = *payload
            .first()
            .ok_or_else(|| Elm327Error::Parse("empty UDS payload".to_string()))?;

        if service_echo == NEGATIVE_RESPONSE {
            if payload.len() < 3 {
                return Err(Elm327Error::Parse(format!(
                    "negative response too short: {} bytes",
                    payload.len()
                )));
            }
            return Err(Elm327Error::NegativeResponse {
                service: payload[1],
                nrc: NegativeResponseCode::from(payload[2]),
            });
        }

        let expected = request_service | 0x40;
        if service_echo != expected {
            return Err(Elm327Error::UnexpectedService {
                expected,
                actual: service_echo,
            });
        }

        if DID_SERVICES.contains(&service_echo) {
            if payload.len() < 3 {
                return Err(Elm327Error::Parse(format!(
                    "payload too short for service 0x{service_echo:02X} with data identifier"
                )));
            }
            let data_identifier = u16::from_be_bytes([payload[1], payload[2]]);
            Ok(UdsResponse {
                service_echo,
                data_identifier: Some(data_identifier),
                payload: payload[3..].to_vec(),
            })
        } else {
            Ok(UdsResponse {
                service_echo,
                data_identifier: None,
                payload: payload[1..].to_vec(),
            })
        }
    }
}

/// Blocking UDS client over an [`Elm327`] engine.
#[derive(Clone)]
pub struct UdsClient {
    engine: Arc<Elm327>,
}

impl UdsClient {
    pub fn new(engine: Arc<Elm327>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Elm327> {
        &self.engine
    }

    /// Send an arbitrary UDS request and return the validated response.
    pub fn send(
        &self,
        target: u16,
        service: u8,
        data: &[u8],
    ) -> Result<UdsResponse, Elm327Error> {
        self.engine.send_uds_message(target, service, data)
    }

    /// ReadDataByIdentifier (0x22): returns the raw payload bytes with the
    /// service echo and data identifier stripped.
    pub fn read_data_by_identifier(&self, target: u16, did: u16) -> Result<Vec<u8>, Elm327Error> {
        let response = self
            .engine
            .send_uds_message(target, READ_DATA_BY_ID, &did.to_be_bytes())?;
        if response.data_identifier != Some(did) {
            return Err(Elm327Error::Parse(format!(
                "data identifier mismatch: requested 0x{did:04X}, got {:?}",
                response.data_identifier
            )));
        }
        debug!(
            can_id = format!("0x{target:03X}"),
            did = format!("0x{did:04X}"),
            len = response.payload.len(),
            "Read data by identifier"
        );
        Ok(response.payload)
    }

    /// TesterPresent (0x3E 0x00), response content ignored.
    pub fn tester_present(&self, target: u16) -> Result<(), Elm327Error> {
        self.engine.send_uds_message(target, TESTER_PRESENT, &[0x00])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_response_with_did() {
        let payload = vec![0x62, 0x01, 0x01, 0xAA, 0xBB];
        let response = UdsResponse::from_payload(payload, 0x22).unwrap();
        assert_eq!(response.service_echo, 0x62);
        assert_eq!(response.data_identifier, Some(0x0101));
        assert_eq!(response.payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn positive_response_without_did() {
        let payload = vec![0x7E, 0x00];
        let response = UdsResponse::from_payload(payload, 0x3E).unwrap();
        assert_eq!(response.service_echo, 0x7E);
        assert_eq!(response.data_identifier, None);
        assert_eq!(response.payload, vec![0x00]);
    }

    #[test]
    fn negative_response_preserves_nrc() {
        let payload = vec![0x7F, 0x22, 0x31];
        match UdsResponse::from_payload(payload, 0x22) {
            Err(Elm327Error::NegativeResponse { service, nrc }) => {
                assert_eq!(service, 0x22);
                assert_eq!(nrc, NegativeResponseCode::RequestOutOfRange);
                assert_eq!(u8::from(nrc), 0x31);
            }
            other => panic!("expected NegativeResponse, got {other:?}"),
        }
    }

    #[test]
    fn wrong_echo_is_a_protocol_error() {
        let payload = vec![0x63, 0x01, 0x01];
        match UdsResponse::from_payload(payload, 0x22) {
            Err(Elm327Error::UnexpectedService { expected, actual }) => {
                assert_eq!(expected, 0x62);
                assert_eq!(actual, 0x63);
            }
            other => panic!("expected UnexpectedService, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(matches!(
            UdsResponse::from_payload(Vec::new(), 0x22),
            Err(Elm327Error::Parse(_))
        ));
    }
}
