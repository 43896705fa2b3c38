//! ISO-TP (ISO 15765-2) segmentation and reassembly
//!
//! Payloads longer than 7 bytes arrive split across a First frame and up to
//! 4095-byte worth of Consecutive frames. This module decodes the PCI byte
//! of each CAN frame and reassembles the ordered frame stream back into a
//! complete payload. Flow control is the adapter's job; `0x3` frames are
//! decoded but never acted upon.

use thiserror::Error;

/// Maximum payload a Single frame can carry.
const SINGLE_FRAME_MAX: usize = 7;
/// Payload bytes carried by a First frame (bytes 2..8).
const FIRST_FRAME_DATA: usize = 6;
/// Maximum declared length of a segmented message (12-bit field).
const MESSAGE_MAX: usize = 4095;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsoTpError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Invalid PCI type 0x{0:X} (expected 0-3)")]
    InvalidPciType(u8),

    #[error("Invalid single frame length {0} (expected 1-7)")]
    InvalidSingleLength(u8),

    #[error("Invalid first frame length {0} (expected 8-4095)")]
    InvalidFirstLength(usize),

    #[error("First frame truncated: {0} bytes")]
    TruncatedFirstFrame(usize),

    #[error("Consecutive frame received without a first frame")]
    ConsecutiveWithoutFirst,

    #[error("First frame received but message already started")]
    UnexpectedFirstFrame,

    #[error("Sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("Frame received after message completion")]
    MessageAlreadyComplete,

    #[error("Incomplete message: expected {expected} bytes, got {got}")]
    IncompleteMessage { expected: usize, got: usize },

    #[error("Invalid frame hex '{0}'")]
    InvalidHex(String),
}

/// A decoded ISO-TP frame, tagged by the PCI type in the high nibble of
/// byte 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsoTpFrame {
    /// Complete message of 1-7 bytes.
    Single { data: Vec<u8> },
    /// Start of a segmented message; `length` is the declared total.
    First { length: usize, data: Vec<u8> },
    /// Continuation carrying up to 7 bytes; `sequence` wraps modulo 16.
    Consecutive { sequence: u8, data: Vec<u8> },
    /// Receiver pacing information; parsed, never acted upon.
    FlowControl { flag: u8, block_size: u8, st_min: u8 },
}

impl IsoTpFrame {
    /// Decode a raw CAN frame payload (CAN ID already stripped).
    ///
    /// CAN pads frames to 8 bytes, so trailing bytes beyond what the PCI
    /// header declares are tolerated and ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, IsoTpError> {
        let pci = *raw.first().ok_or(IsoTpError::EmptyFrame)?;
        match pci >> 4 {
            0x0 => {
                let len = (pci & 0x0F) as usize;
                if len == 0 || len > SINGLE_FRAME_MAX {
                    return Err(IsoTpError::InvalidSingleLength(pci & 0x0F));
                }
                // Adapters occasionally deliver a single frame shorter than
                // its declared length; take what is actually there.
                let end = raw.len().min(1 + len);
                Ok(IsoTpFrame::Single {
                    data: raw[1..end].to_vec(),
                })
            }
            0x1 => {
                if raw.len() < 2 {
                    return Err(IsoTpError::TruncatedFirstFrame(raw.len()));
                }
                let length = (((pci & 0x0F) as usize) << 8) | raw[1] as usize;
                if length <= SINGLE_FRAME_MAX || length > MESSAGE_MAX {
                    return Err(IsoTpError::InvalidFirstLength(length));
                }
                let end = raw.len().min(2 + FIRST_FRAME_DATA);
                Ok(IsoTpFrame::First {
                    length,
                    data: raw[2..end].to_vec(),
                })
            }
            0x2 => {
                let end = raw.len().min(8);
                Ok(IsoTpFrame::Consecutive {
                    sequence: pci & 0x0F,
                    data: raw[1..end].to_vec(),
                })
            }
            0x3 => Ok(IsoTpFrame::FlowControl {
                flag: pci & 0x0F,
                block_size: raw.get(1).copied().unwrap_or(0),
                st_min: raw.get(2).copied().unwrap_or(0),
            }),
            other => Err(IsoTpError::InvalidPciType(other)),
        }
    }
}

/// Reassembly state for one ISO-TP message.
///
/// Created empty per UDS transaction and fed frames in arrival order. The
/// declared length is authoritative: consecutive-frame padding past it is
/// truncated away once enough bytes have arrived.
#[derive(Debug, Default)]
pub struct IsoTpMessage {
    buffer: Vec<u8>,
    expected_length: Option<usize>,
    next_sequence: u8,
    complete: bool,
}

impl IsoTpMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed the next frame of the message.
    pub fn absorb(&mut self, frame: IsoTpFrame) -> Result<(), IsoTpError> {
        if self.complete {
            return Err(IsoTpError::MessageAlreadyComplete);
        }
        match frame {
            IsoTpFrame::Single { data } => {
                if self.expected_length.is_some() || !self.buffer.is_empty() {
                    return Err(IsoTpError::UnexpectedFirstFrame);
                }
                self.expected_length = Some(data.len());
                self.buffer = data;
                self.complete = true;
            }
            IsoTpFrame::First { length, data } => {
                if self.expected_length.is_some() || !self.buffer.is_empty() {
                    return Err(IsoTpError::UnexpectedFirstFrame);
                }
                self.expected_length = Some(length);
                self.buffer.extend_from_slice(&data);
                self.next_sequence = 1;
            }
            IsoTpFrame::Consecutive { sequence, data } => {
                let expected_length = self
                    .expected_length
                    .ok_or(IsoTpError::ConsecutiveWithoutFirst)?;
                if sequence != self.next_sequence {
                    return Err(IsoTpError::SequenceMismatch {
                        expected: self.next_sequence,
                        got: sequence,
                    });
                }
                self.next_sequence = (self.next_sequence + 1) % 16;
                self.buffer.extend_from_slice(&data);
                if self.buffer.len() >= expected_length {
                    self.buffer.truncate(expected_length);
                    self.complete = true;
                }
            }
            IsoTpFrame::FlowControl { .. } => {}
        }
        Ok(())
    }

    /// Finish reassembly, yielding the payload.
    pub fn into_payload(self) -> Result<Vec<u8>, IsoTpError> {
        if !self.complete {
            return Err(IsoTpError::IncompleteMessage {
                expected: self.expected_length.unwrap_or(0),
                got: self.buffer.len(),
            });
        }
        Ok(self.buffer)
    }
}

/// Reassemble a list of per-frame hex strings (CAN IDs already stripped)
/// into a complete payload.
pub fn parse_isotp_frames<S: AsRef<str>>(frames: &[S]) -> Result<Vec<u8>, IsoTpError> {
    let mut message = IsoTpMessage::new();
    for frame_hex in frames {
        let frame_hex = frame_hex.as_ref();
        let raw = hex::decode(frame_hex)
            .map_err(|_| IsoTpError::InvalidHex(frame_hex.to_string()))?;
        message.absorb(IsoTpFrame::parse(&raw)?)?;
    }
    message.into_payload()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Segment a payload into ISO-TP frame hex strings the way a
    /// transmitting node would, padding frames to 8 bytes with 0xAA.
    fn segment(payload: &[u8]) -> Vec<String> {
        assert!(!payload.is_empty() && payload.len() <= MESSAGE_MAX);
        if payload.len() <= SINGLE_FRAME_MAX {
            let mut frame = vec![payload.len() as u8];
            frame.extend_from_slice(payload);
            return vec![hex::encode_upper(frame)];
        }

        let mut frames = Vec::new();
        let mut first = vec![
            0x10 | ((payload.len() >> 8) as u8 & 0x0F),
            (payload.len() & 0xFF) as u8,
        ];
        first.extend_from_slice(&payload[..FIRST_FRAME_DATA]);
        frames.push(hex::encode_upper(first));

        let mut sequence = 1u8;
        for chunk in payload[FIRST_FRAME_DATA..].chunks(7) {
            let mut frame = vec![0x20 | sequence];
            frame.extend_from_slice(chunk);
            while frame.len() < 8 {
                frame.push(0xAA);
            }
            frames.push(hex::encode_upper(frame));
            sequence = (sequence + 1) % 16;
        }
        frames
    }

    #[test]
    fn single_frame_parses() {
        let frame = IsoTpFrame::parse(&[0x03, 0x41, 0x0D, 0x00]).unwrap();
        assert_eq!(
            frame,
            IsoTpFrame::Single {
                data: vec![0x41, 0x0D, 0x00]
            }
        );
    }

    #[test]
    fn single_frame_ignores_padding() {
        let frame = IsoTpFrame::parse(&[0x02, 0x7E, 0x00, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]).unwrap();
        assert_eq!(
            frame,
            IsoTpFrame::Single {
                data: vec![0x7E, 0x00]
            }
        );
    }

    #[test]
    fn short_single_frame_tolerated() {
        // PCI declares 6 bytes but the adapter delivered only 5.
        let payload = parse_isotp_frames(&["06410D000000"]).unwrap();
        assert_eq!(payload, vec![0x41, 0x0D, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn first_frame_parses_twelve_bit_length() {
        let frame =
            IsoTpFrame::parse(&[0x1F, 0xFF, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]).unwrap();
        assert_eq!(
            frame,
            IsoTpFrame::First {
                length: 4095,
                data: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
            }
        );
    }

    #[test]
    fn invalid_pci_type_rejected() {
        for pci in [0x40u8, 0x50, 0x90, 0xF0] {
            assert_eq!(
                IsoTpFrame::parse(&[pci, 0x00]),
                Err(IsoTpError::InvalidPciType(pci >> 4))
            );
        }
    }

    #[test]
    fn zero_length_single_frame_rejected() {
        assert_eq!(
            IsoTpFrame::parse(&[0x00, 0x11]),
            Err(IsoTpError::InvalidSingleLength(0))
        );
    }

    #[test]
    fn round_trip_short_and_long_payloads() {
        for len in [1usize, 7, 8, 62, 100, 111, 112, 113, 500, 4095] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames = segment(&payload);
            let reassembled = parse_isotp_frames(&frames).unwrap();
            assert_eq!(reassembled, payload, "round trip failed for length {len}");
        }
    }

    #[test]
    fn sequence_wraps_modulo_sixteen() {
        // 6 + 16*7 = 118 bytes needs sequence numbers 1..15 then 0
        let payload: Vec<u8> = (0..118).map(|i| i as u8).collect();
        let frames = segment(&payload);
        assert_eq!(parse_isotp_frames(&frames).unwrap(), payload);
    }

    #[test]
    fn skipped_sequence_rejected() {
        let frames = ["10 10 AA AA AA AA AA", "22 BB BB BB BB BB BB BB"]
            .map(|f| f.replace(' ', ""));
        assert_eq!(
            parse_isotp_frames(&frames),
            Err(IsoTpError::SequenceMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let payload: Vec<u8> = (0..20).collect();
        let mut frames = segment(&payload);
        let dup = frames[1].clone();
        frames.insert(2, dup);
        assert_eq!(
            parse_isotp_frames(&frames),
            Err(IsoTpError::SequenceMismatch { expected: 2, got: 1 })
        );
    }

    #[test]
    fn consecutive_before_first_rejected() {
        assert_eq!(
            parse_isotp_frames(&["2100112233445566"]),
            Err(IsoTpError::ConsecutiveWithoutFirst)
        );
    }

    #[test]
    fn second_first_frame_rejected() {
        let frames = ["100A001122334455", "100A001122334455"];
        assert_eq!(
            parse_isotp_frames(&frames),
            Err(IsoTpError::UnexpectedFirstFrame)
        );
    }

    #[test]
    fn missing_tail_reports_incomplete() {
        let payload: Vec<u8> = (0..30).collect();
        let mut frames = segment(&payload);
        frames.pop();
        assert_eq!(
            parse_isotp_frames(&frames),
            Err(IsoTpError::IncompleteMessage {
                expected: 30,
                got: 27
            })
        );
    }

    #[test]
    fn padding_truncated_to_declared_length() {
        // 10 bytes declared; the last consecutive frame carries padding.
        let frames =
            ["100A00112233 4455", "21 66778899AABBCC"].map(|f| f.replace(' ', ""));
        let payload = parse_isotp_frames(&frames).unwrap();
        assert_eq!(
            payload,
            vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99]
        );
    }

    #[test]
    fn flow_control_frames_are_ignored() {
        let frames = [
            "100A001122334455".to_string(),
            "300000".to_string(),
            "2166778899AABBCC".to_string(),
        ];
        let payload = parse_isotp_frames(&frames).unwrap();
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(matches!(
            parse_isotp_frames(&["ZZ00"]),
            Err(IsoTpError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_isotp_frames(&["123"]),
            Err(IsoTpError::InvalidHex(_))
        ));
    }

    #[test]
    fn frame_after_completion_rejected() {
        let frames = ["0211AA", "0211AA"];
        assert_eq!(
            parse_isotp_frames(&frames),
            Err(IsoTpError::MessageAlreadyComplete)
        );
    }
}
