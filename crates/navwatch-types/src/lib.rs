use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Operational role of a navaid transmission path.
///
/// Dual-path equipment (ILS localizers, glide paths, DME transponders)
/// reports which of its two transmitters is currently radiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathState {
    /// The transmitter currently radiating.
    Active,
    /// The hot standby transmitter.
    Standby,
}

/// Health classification carried by the monitor byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Warning,
    Alarm,
    Fault,
}

/// Expected origin of an equipment's datagrams.
///
/// Serialised as the string `"any"` or a literal dotted-quad IPv4 address,
/// matching the descriptor format the configuration collaborator hands us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    /// Accept datagrams from any source address.
    Any,
    /// Expect datagrams from exactly this address.
    Fixed(Ipv4Addr),
}

impl SourceFilter {
    /// Whether `ip` satisfies this filter.  `Any` accepts everything;
    /// `Fixed` requires an exact IPv4 match.
    pub fn accepts(&self, ip: IpAddr) -> bool {
        match self {
            SourceFilter::Any => true,
            SourceFilter::Fixed(expected) => ip == IpAddr::V4(*expected),
        }
    }
}

impl std::fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFilter::Any => write!(f, "any"),
            SourceFilter::Fixed(ip) => write!(f, "{ip}"),
        }
    }
}

impl FromStr for SourceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("any") {
            return Ok(SourceFilter::Any);
        }
        s.parse::<Ipv4Addr>()
            .map(SourceFilter::Fixed)
            .map_err(|e| format!("'{s}' is neither \"any\" nor an IPv4 address: {e}"))
    }
}

impl Serialize for SourceFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SourceFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity and socket binding of one piece of monitored equipment.
///
/// Owned by the configuration collaborator.  The core mutates only
/// `listen_port`, and only as part of its own rebind operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentDescriptor {
    /// Unique, stable, slug-form identifier (e.g. `"dme-27l"`).
    pub id: String,
    /// Operator-facing display name.
    pub name: String,
    /// Source address the equipment is expected to transmit from.
    pub expected_source_ip: SourceFilter,
    /// Dedicated UDP port this equipment's datagrams arrive on.
    /// Unique across all descriptors.
    pub listen_port: u16,
    pub enabled: bool,
}

/// Live state of one piece of equipment, rebuilt on every valid packet.
///
/// `connected` is flipped to `false` only by the liveness sweep and back to
/// `true` only by a new valid packet; the last-known `path_state` and
/// `severity` are preserved through a disconnect for operator visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub equipment_id: String,
    pub path_state: PathState,
    pub severity: Severity,
    pub last_seen_at: DateTime<Utc>,
    pub connected: bool,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub listen_port: u16,
}

/// Unified event wrapper published on the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"navwatch-net::udp"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Build an event stamped with a fresh id and the current time.
    pub fn now(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A valid packet was recorded for `equipment_id`; `status` is the full
    /// snapshot after the update.
    StatusChanged {
        equipment_id: String,
        status: EquipmentStatus,
    },
    /// An administrative rebind moved `equipment_id` to a new listening port.
    PortChanged {
        equipment_id: String,
        old_port: u16,
        new_port: u16,
    },
}

/// Global error type spanning decode failures, socket faults, and rejected
/// administrative requests.  Nothing here is process-fatal.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum NavError {
    #[error("byte 0x{byte:02X} is not a valid monitor byte")]
    DecodeInvalid { byte: u8 },

    #[error("no valid monitor byte in {length}-byte payload")]
    NoMonitorByte { length: usize },

    #[error("no equipment is registered on port {port}")]
    UnknownSource { port: u16 },

    #[error("no listening equipment with id '{id}'")]
    UnknownEquipment { id: String },

    #[error("udp port {port} is already in use")]
    PortInUse {
        port: u16,
        /// Equipment id owning the binding, or `None` when the port is held
        /// outside this process.
        owner: Option<String>,
    },

    #[error("permission denied binding udp port {port}: {details}")]
    BindPermission { port: u16, details: String },

    #[error("failed to bind udp port {port}: {details}")]
    Bind { port: u16, details: String },

    #[error("socket fault on port {port}: {details}")]
    SocketFault { port: u16, details: String },

    #[error("event channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_filter_any_roundtrip() {
        let json = serde_json::to_string(&SourceFilter::Any).unwrap();
        assert_eq!(json, "\"any\"");
        let back: SourceFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceFilter::Any);
    }

    #[test]
    fn source_filter_fixed_roundtrip() {
        let filter = SourceFilter::Fixed(Ipv4Addr::new(10, 20, 30, 40));
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, "\"10.20.30.40\"");
        let back: SourceFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn source_filter_rejects_garbage() {
        let result = serde_json::from_str::<SourceFilter>("\"not-an-ip\"");
        assert!(result.is_err());
    }

    #[test]
    fn source_filter_accepts() {
        let fixed = SourceFilter::Fixed(Ipv4Addr::new(192, 168, 1, 5));
        assert!(fixed.accepts("192.168.1.5".parse().unwrap()));
        assert!(!fixed.accepts("192.168.1.6".parse().unwrap()));
        assert!(SourceFilter::Any.accepts("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn descriptor_roundtrip() {
        let desc = EquipmentDescriptor {
            id: "dme-27l".to_string(),
            name: "DME runway 27L".to_string(),
            expected_source_ip: SourceFilter::Any,
            listen_port: 5001,
            enabled: true,
        };
        let json = serde_json::to_string(&desc).unwrap();
        let back: EquipmentDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn event_roundtrip() {
        let status = EquipmentStatus {
            equipment_id: "gp-09".to_string(),
            path_state: PathState::Active,
            severity: Severity::Warning,
            last_seen_at: Utc::now(),
            connected: true,
            source_ip: "127.0.0.1".parse().unwrap(),
            source_port: 40000,
            listen_port: 5002,
        };
        let event = Event::now(
            "navwatch-net::udp",
            EventPayload::StatusChanged {
                equipment_id: "gp-09".to_string(),
                status,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.source, event.source);
    }

    #[test]
    fn path_state_serialises_upper_case() {
        assert_eq!(serde_json::to_string(&PathState::Active).unwrap(), "\"ACTIVE\"");
        assert_eq!(serde_json::to_string(&Severity::Fault).unwrap(), "\"FAULT\"");
    }

    #[test]
    fn nav_error_display() {
        let err = NavError::PortInUse {
            port: 5001,
            owner: Some("dme-27l".to_string()),
        };
        assert!(err.to_string().contains("5001"));

        let err2 = NavError::DecodeInvalid { byte: 0x41 };
        assert!(err2.to_string().contains("0x41"));
    }
}
