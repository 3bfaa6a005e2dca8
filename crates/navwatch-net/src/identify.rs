//! Source identification policy.
//!
//! A datagram's identity comes from the port it arrived on: each piece of
//! equipment owns a dedicated listening socket, which is itself a strong
//! identity signal.  The source-IP check is a cross-check only – a mismatch
//! is warned about and flagged, never dropped, because the alternative is
//! going blind on a navaid whose address changed under us.
//!
//! Loopback sources skip the IP check entirely so that local simulators can
//! feed any equipment without per-simulator address configuration.

use navwatch_types::EquipmentDescriptor;
use std::net::IpAddr;

/// Outcome of cross-checking a datagram's source address against the
/// descriptor of the equipment that owns the receiving port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCheck {
    /// Source matches the expected address (or the descriptor accepts any).
    Match,
    /// Loopback source: IP checks are skipped by design, port is identity.
    LoopbackBypass,
    /// Source differs from the expected address.  The packet is still
    /// attributed to the port's equipment; callers decide how loudly to log.
    Mismatch,
}

/// Cross-check `source_ip` against the descriptor's expected source.
pub fn check_source(descriptor: &EquipmentDescriptor, source_ip: IpAddr) -> SourceCheck {
    if source_ip.is_loopback() {
        return SourceCheck::LoopbackBypass;
    }
    if descriptor.expected_source_ip.accepts(source_ip) {
        SourceCheck::Match
    } else {
        SourceCheck::Mismatch
    }
}
