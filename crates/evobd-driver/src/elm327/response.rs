//! ELM327 response tokenizer
//!
//! With `ATH1` set, every data line of an adapter response is an 11-bit CAN
//! ID (3 hex digits) followed by the frame's data bytes, with (`ATS1`) or
//! without (`ATS0`) spaces:
//!
//! ```text
//! 7EC 10 3E 62 01 01 EF FB E7
//! 7EC103E620101EFFBE7
//! ```
//!
//! Both forms tokenize identically. Informational chatter is dropped,
//! adapter error tokens abort the parse.

use super::Elm327Error;

/// Status lines the adapter emits that carry no data. Dropped when they
/// stand alone on a line.
const INFO_TOKENS: &[&str] = &["SEARCHING...", "OK"];

/// Adapter error tokens. Order matters: the specific CAN/buffer tokens must
/// be tried before the bare `ERROR` substring.
const ERROR_TOKENS: &[&str] = &[
    "NO DATA",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUFFER FULL",
    "STOPPED",
    "ERROR",
    "?",
];

/// A CAN frame recovered from one line of adapter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// 11-bit identifier (canonically 3 hex digits).
    pub can_id: u16,
    /// 0-8 data bytes.
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Parse a normalized (whitespace-free) response line.
    fn parse(compact: &str) -> Result<Self, Elm327Error> {
        if compact.len() < 3 {
            return Err(Elm327Error::Parse(format!(
                "line too short for a CAN ID: '{compact}'"
            )));
        }
        let (id_part, data_part) = compact.split_at(3);
        let can_id = u16::from_str_radix(id_part, 16)
            .map_err(|_| Elm327Error::Parse(format!("invalid CAN ID '{id_part}'")))?;
        if data_part.len() < 2 {
            return Err(Elm327Error::Parse(format!(
                "frame {id_part} carries no data: '{compact}'"
            )));
        }
        let data = hex::decode(data_part)
            .map_err(|_| Elm327Error::Parse(format!("invalid frame hex '{data_part}'")))?;
        Ok(CanFrame { can_id, data })
    }
}

/// Scan response text for an adapter error token. Returns the token itself
/// so the caller can surface it verbatim.
pub(crate) fn find_error_token(text: &str) -> Option<String> {
    for raw_line in text.split(['\r', '\n']) {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("<DATA ERROR") {
            return Some("<DATA ERROR".to_string());
        }
        for token in ERROR_TOKENS {
            let hit = if *token == "?" {
                line == "?"
            } else {
                line.contains(token)
            };
            if hit {
                return Some((*token).to_string());
            }
        }
    }
    None
}

/// Tokenize a prompt-stripped response into ordered CAN frames.
///
/// `echo_of` is the command that produced the response; a line repeating it
/// verbatim (echo not yet disabled) is dropped.
pub(crate) fn split_frames(text: &str, echo_of: &str) -> Result<Vec<CanFrame>, Elm327Error> {
    if let Some(token) = find_error_token(text) {
        return Err(Elm327Error::NoResponse(token));
    }

    let mut frames = Vec::new();
    for raw_line in text.split(['\r', '\n']) {
        let line = raw_line.trim();
        if line.is_empty()
            || line == echo_of
            || line.starts_with("BUS INIT")
            || INFO_TOKENS.contains(&line)
        {
            continue;
        }
        let compact: String = line.split_whitespace().collect();
        frames.push(CanFrame::parse(&compact)?);
    }

    if frames.is_empty() {
        return Err(Elm327Error::Parse(format!(
            "no data frames in response: '{}'",
            text.trim()
        )));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACED: &str = "7EC 10 3E 62 01 01 EF FB E7 \r7EC 21 ED 69 00 00 00 00 00 \r";

    #[test]
    fn spaced_and_compact_forms_tokenize_identically() {
        let compact = SPACED.replace(' ', "");
        let a = split_frames(SPACED, "220101").unwrap();
        let b = split_frames(&compact, "220101").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].can_id, 0x7EC);
        assert_eq!(a[0].data[0], 0x10);
    }

    #[test]
    fn informational_lines_are_dropped() {
        let text = "SEARCHING...\rBUS INIT...\rOK\r7E8 03 41 0D 00\r";
        let frames = split_frames(text, "010D").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].can_id, 0x7E8);
        assert_eq!(frames[0].data, vec![0x03, 0x41, 0x0D, 0x00]);
    }

    #[test]
    fn command_echo_is_dropped() {
        let text = "220101\r7EC 06 62 01 01 AA BB CC\r";
        let frames = split_frames(text, "220101").unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn duplicate_can_ids_and_order_preserved() {
        let frames = split_frames(SPACED, "220101").unwrap();
        assert_eq!(frames[0].can_id, frames[1].can_id);
        assert_eq!(frames[0].data[1], 0x3E);
        assert_eq!(frames[1].data[1], 0xED);
    }

    #[test]
    fn every_error_token_is_detected() {
        for text in [
            "NO DATA",
            "SEARCHING...\rNO DATA\r",
            "  UNABLE TO CONNECT  ",
            "CAN ERROR",
            "BUFFER FULL",
            "STOPPED",
            "ERROR",
            "?",
            "<DATA ERROR",
            "OK\r\n\nSTOPPED\n",
        ] {
            let result = split_frames(text, "220101");
            assert!(
                matches!(result, Err(Elm327Error::NoResponse(_))),
                "expected error token detection for {text:?}"
            );
        }
    }

    #[test]
    fn error_token_payload_is_exact() {
        match split_frames("SEARCHING...\rNO DATA\r", "220101") {
            Err(Elm327Error::NoResponse(token)) => assert_eq!(token, "NO DATA"),
            other => panic!("expected NoResponse, got {other:?}"),
        }
    }

    #[test]
    fn invalid_can_id_is_a_parse_error() {
        assert!(matches!(
            split_frames("XYZ 01 02 03\r", "220101"),
            Err(Elm327Error::Parse(_))
        ));
    }

    #[test]
    fn response_without_frames_is_a_parse_error() {
        assert!(matches!(
            split_frames("OK\r\r", "220101"),
            Err(Elm327Error::Parse(_))
        ));
    }
}
