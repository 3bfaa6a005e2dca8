//! `navwatch-codec` – the single-byte monitor protocol.
//!
//! Navaid monitors report their state in one byte with the bit layout
//! `10PSSxxx`:
//!
//! | Bits | Meaning |
//! |---|---|
//! | 7–6 | Validity marker, must be exactly `10` |
//! | 5 | Path state: `1` = ACTIVE, `0` = STANDBY |
//! | 4–3 | Severity: `00` NORMAL, `01` WARNING, `10` ALARM, `11` FAULT |
//! | 2–0 | Unused |
//!
//! A datagram may carry any number of bytes; only the first byte matching the
//! validity pattern is operationally significant ([`decode_packet`]).  The
//! first-found tie-break is deliberate: monitors emit exactly one status byte
//! per packet, and filler bytes never match the `10xxxxxx` pattern, so
//! scanning for "the best" byte would add policy without adding information.

use navwatch_types::{NavError, PathState, Severity};

/// Bits 7–6 select validity.
const VALIDITY_MASK: u8 = 0xC0;
/// A valid monitor byte has bit 7 set and bit 6 clear.
const VALIDITY_PATTERN: u8 = 0x80;
/// Bit 5 carries the path state.
const PATH_BIT: u8 = 0x20;
/// Bits 4–3 carry the severity.
const SEVERITY_MASK: u8 = 0x18;
const SEVERITY_SHIFT: u8 = 3;

/// A successfully decoded monitor byte.
///
/// Constructed only by [`decode`], so holding one is proof the validity bits
/// checked out.  Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorByte {
    pub path_state: PathState,
    pub severity: Severity,
    /// The raw wire byte, kept for diagnostics.
    pub raw: u8,
}

impl MonitorByte {
    /// Render the raw byte as an 8-character binary string
    /// (e.g. `"10101000"`).  Diagnostic output only.
    pub fn binary_digits(&self) -> String {
        format!("{:08b}", self.raw)
    }
}

/// Whether `byte` matches the `10xxxxxx` validity pattern.
pub fn is_valid_monitor_byte(byte: u8) -> bool {
    byte & VALIDITY_MASK == VALIDITY_PATTERN
}

/// Decode a single wire byte.
///
/// # Errors
///
/// Returns [`NavError::DecodeInvalid`] when the validity bits are not exactly
/// `{bit7=1, bit6=0}`.
pub fn decode(byte: u8) -> Result<MonitorByte, NavError> {
    if !is_valid_monitor_byte(byte) {
        return Err(NavError::DecodeInvalid { byte });
    }

    let path_state = if byte & PATH_BIT != 0 {
        PathState::Active
    } else {
        PathState::Standby
    };

    let severity = match (byte & SEVERITY_MASK) >> SEVERITY_SHIFT {
        0b00 => Severity::Normal,
        0b01 => Severity::Warning,
        0b10 => Severity::Alarm,
        _ => Severity::Fault,
    };

    Ok(MonitorByte {
        path_state,
        severity,
        raw: byte,
    })
}

/// Encode a path state and severity into a wire byte.
///
/// Exact inverse of [`decode`]; used by the simulator and tests, never by the
/// ingestion path.
pub fn encode(path_state: PathState, severity: Severity) -> u8 {
    let path_bits = match path_state {
        PathState::Active => PATH_BIT,
        PathState::Standby => 0,
    };
    let severity_bits = match severity {
        Severity::Normal => 0b00,
        Severity::Warning => 0b01,
        Severity::Alarm => 0b10,
        Severity::Fault => 0b11,
    } << SEVERITY_SHIFT;

    VALIDITY_PATTERN | path_bits | severity_bits
}

/// Operational decode path: scan `payload` and return the **first** valid
/// monitor byte with its offset.
///
/// # Errors
///
/// Returns [`NavError::NoMonitorByte`] when no byte in the payload matches
/// the validity pattern.
pub fn decode_packet(payload: &[u8]) -> Result<(usize, MonitorByte), NavError> {
    payload
        .iter()
        .enumerate()
        .find_map(|(offset, &byte)| decode(byte).ok().map(|decoded| (offset, decoded)))
        .ok_or(NavError::NoMonitorByte {
            length: payload.len(),
        })
}

/// Diagnostic decode path: every valid monitor byte in `payload`, in order,
/// with byte offsets.  Used only when inspecting unidentifiable traffic.
pub fn decode_payload(payload: &[u8]) -> Vec<(usize, MonitorByte)> {
    payload
        .iter()
        .enumerate()
        .filter_map(|(offset, &byte)| decode(byte).ok().map(|decoded| (offset, decoded)))
        .collect()
}
