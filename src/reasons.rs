//! Close status codes (RFC 6455 §7.4).
//!
//! Grounded on the Python original's `websocket/reasons.py`, minus its `Reason.INSTANCES` global
//! mutable registry — a `const` table and a plain `Copy` struct serve the same lookup without the
//! runtime bookkeeping a long-lived process doesn't need.

use crate::error::Error;

/// A close code together with the human-readable description the protocol associates with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reason {
    pub code: u16,
    pub description: &'static str,
}

pub const NORMAL: Reason = Reason { code: 1000, description: "normal closure" };
pub const GOING_AWAY: Reason = Reason { code: 1001, description: "endpoint going away" };
pub const PROTOCOL_ERROR: Reason = Reason { code: 1002, description: "protocol error" };
pub const UNSUPPORTED_DATA: Reason = Reason { code: 1003, description: "unsupported data" };
pub const NO_STATUS: Reason = Reason { code: 1005, description: "no status code present" };
pub const ABNORMAL_CLOSURE: Reason = Reason { code: 1006, description: "abnormal closure" };
pub const INCONSISTENT_DATA: Reason = Reason { code: 1007, description: "invalid frame payload data" };
pub const POLICY_VIOLATION: Reason = Reason { code: 1008, description: "policy violation" };
pub const MESSAGE_TOO_BIG: Reason = Reason { code: 1009, description: "message too big" };
pub const MANDATORY_EXTENSION: Reason = Reason { code: 1010, description: "mandatory extension" };
pub const INTERNAL_ERROR: Reason = Reason { code: 1011, description: "internal server error" };
pub const TLS_HANDSHAKE_FAILURE: Reason = Reason { code: 1015, description: "TLS handshake failure" };

/// Codes that are reserved and must never appear on the wire in a Close frame.
const INVALID_CODES: [u16; 4] = [1004, 1005, 1006, 1015];

/// `1012..=1014` and `1016..3000` are reserved for future use and not currently assigned.
fn is_undefined(code: u16) -> bool {
    (1012..=1014).contains(&code) || (1016..3000).contains(&code)
}

/// Validates a close code read off the wire, as an unsigned 16-bit host-order integer (not a raw
/// byte comparison — see SPEC_FULL §9). `1005`/`NO_STATUS` is a synthetic value used internally to
/// mean "the peer sent an empty Close frame"; it must never reach this function with wire bytes.
pub fn validate_code(code: u16) -> Result<u16, Error> {
    if code < NORMAL.code || INVALID_CODES.contains(&code) || is_undefined(code) {
        return Err(Error::InvalidCloseCode(code));
    }
    Ok(code)
}

/// Parses the body of a Close frame's payload into a `(code, reason)` pair.
///
/// An empty payload means "no status code present" and normalizes to `NORMAL` per SPEC_FULL §9 —
/// `NO_STATUS` is never echoed back to a peer. A payload of exactly one byte is a protocol error
/// (the code field is always two bytes). Reason bytes beyond the code are validated as UTF-8 by
/// the caller, matching RFC 6455 §5.5.1.
pub fn parse_close_payload(payload: &[u8]) -> Result<(u16, &[u8]), Error> {
    if payload.is_empty() {
        return Ok((NORMAL.code, &[]));
    }
    if payload.len() < 2 {
        return Err(Error::InvalidCloseCode(0));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let code = validate_code(code)?;
    Ok((code, &payload[2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_and_custom_application_codes_are_valid() {
        assert!(validate_code(1000).is_ok());
        assert!(validate_code(3000).is_ok());
        assert!(validate_code(4999).is_ok());
    }

    #[test]
    fn reserved_invalid_codes_are_rejected() {
        for code in INVALID_CODES {
            assert!(validate_code(code).is_err());
        }
    }

    #[test]
    fn undefined_ranges_are_rejected() {
        assert!(validate_code(1012).is_err());
        assert!(validate_code(1014).is_err());
        assert!(validate_code(1016).is_err());
        assert!(validate_code(2999).is_err());
    }

    #[test]
    fn below_normal_is_rejected() {
        assert!(validate_code(999).is_err());
    }

    #[test]
    fn empty_close_payload_normalizes_to_normal() {
        let (code, reason) = parse_close_payload(&[]).unwrap();
        assert_eq!(code, NORMAL.code);
        assert!(reason.is_empty());
    }

    #[test]
    fn single_byte_close_payload_is_rejected() {
        assert!(parse_close_payload(&[0x03]).is_err());
    }

    #[test]
    fn two_byte_close_payload_parses_code_as_big_endian_u16() {
        let (code, reason) = parse_close_payload(&[0x03, 0xE8]).unwrap();
        assert_eq!(code, 1000);
        assert!(reason.is_empty());
    }
}
