//! [`SocketManager`] – owns one bound UDP socket per enabled equipment.
//!
//! Port state machine per binding: UNBOUND → BINDING → LISTENING →
//! (CLOSING → UNBOUND).  Exactly one binding may exist per port at any time;
//! a second bind request on an in-use port is rejected with
//! [`NavError::PortInUse`], never silently overwritten.
//!
//! Administrative operations (`add_equipment`, `remove_equipment`,
//! `update_port`, `stop`) serialise through one async mutex – the single
//! administrative path the concurrency model requires.  They must not be
//! called from within a datagram handler.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use navwatch_bus::EventBus;
use navwatch_codec::decode_packet;
use navwatch_tracker::EquipmentTracker;
use navwatch_types::{EquipmentDescriptor, Event, EventPayload, NavError};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::identify::{check_source, SourceCheck};

/// `source` field stamped on every event this crate publishes.
const EVENT_SOURCE: &str = "navwatch-net::udp";

/// Receive buffer size.  Monitor datagrams are a handful of bytes; anything
/// longer is still scanned but truncated at this size.
const MAX_DATAGRAM: usize = 2048;

struct Binding {
    descriptor: EquipmentDescriptor,
    reader: JoinHandle<()>,
}

/// Explicitly owned manager of per-equipment UDP listeners.
///
/// Clone it cheaply – all clones share the same binding map, tracker, and
/// bus.  No ambient singleton state: multiple managers coexist in tests.
#[derive(Clone)]
pub struct SocketManager {
    bindings: Arc<Mutex<HashMap<u16, Binding>>>,
    tracker: EquipmentTracker,
    bus: EventBus,
    strict_sources: bool,
}

impl SocketManager {
    /// Create a manager feeding `tracker` and publishing on `bus`.
    pub fn new(tracker: EquipmentTracker, bus: EventBus) -> Self {
        Self {
            bindings: Arc::new(Mutex::new(HashMap::new())),
            tracker,
            bus,
            strict_sources: false,
        }
    }

    /// Escalate source-IP mismatches from warnings to errors
    /// (builder-style).  Identification still goes by port either way;
    /// packets are never dropped for an IP mismatch alone.
    pub fn with_strict_sources(mut self, strict: bool) -> Self {
        self.strict_sources = strict;
        self
    }

    /// Bind every enabled descriptor.
    ///
    /// A bind failure is reported per equipment and does not abort startup
    /// of the others.  Returns the failures; an empty vec means every
    /// enabled descriptor is listening.
    pub async fn start(&self, descriptors: &[EquipmentDescriptor]) -> Vec<(String, NavError)> {
        let mut failures = Vec::new();
        for descriptor in descriptors {
            if let Err(e) = self.add_equipment(descriptor.clone()).await {
                warn!(equipment = %descriptor.id, error = %e, "bind failed during bulk start");
                failures.push((descriptor.id.clone(), e));
            }
        }
        failures
    }

    /// Bind a listening socket for `descriptor` and start its reader task.
    ///
    /// Disabled descriptors are skipped successfully.
    ///
    /// # Errors
    ///
    /// [`NavError::PortInUse`] when the port already has a binding (ours or
    /// the OS's), [`NavError::BindPermission`] when the OS denies the bind,
    /// [`NavError::Bind`] for other bind failures.
    pub async fn add_equipment(&self, descriptor: EquipmentDescriptor) -> Result<(), NavError> {
        if !descriptor.enabled {
            debug!(equipment = %descriptor.id, "descriptor disabled; not binding");
            return Ok(());
        }
        let mut bindings = self.bindings.lock().await;
        self.bind_locked(&mut bindings, descriptor).await
    }

    /// Close the binding owned by `id`.  A no-op (not an error) when the
    /// equipment was never listening.  Drops the tracker state for `id` as
    /// well: this operation is the descriptor-removal path.
    pub async fn remove_equipment(&self, id: &str) {
        let binding = {
            let mut bindings = self.bindings.lock().await;
            let port = bindings
                .iter()
                .find(|(_, b)| b.descriptor.id == id)
                .map(|(port, _)| *port);
            port.and_then(|port| bindings.remove(&port))
        };

        match binding {
            Some(binding) => {
                Self::close_binding(binding).await;
                self.tracker.remove(id);
                info!(equipment = id, "equipment removed, socket closed");
            }
            None => debug!(equipment = id, "remove for non-listening equipment ignored"),
        }
    }

    /// Move `id`'s binding to `new_port`.
    ///
    /// Rebinding to the equipment's own current port is a no-op success.
    /// The observable order is close-old-then-open-new; datagrams arriving
    /// on the old port inside that window are dropped by design.
    ///
    /// # Errors
    ///
    /// [`NavError::PortInUse`] when `new_port` is bound by a different
    /// equipment, [`NavError::UnknownEquipment`] when `id` has no current
    /// binding, plus the bind failures of [`add_equipment`](Self::add_equipment).
    /// After a failed bind the equipment is left unbound; the other bindings
    /// are unaffected.
    pub async fn update_port(&self, id: &str, new_port: u16) -> Result<(), NavError> {
        let mut bindings = self.bindings.lock().await;

        let old_port = bindings
            .iter()
            .find(|(_, b)| b.descriptor.id == id)
            .map(|(port, _)| *port);

        let Some(old_port) = old_port else {
            return Err(NavError::UnknownEquipment { id: id.to_string() });
        };
        if old_port == new_port {
            return Ok(());
        }
        if let Some(existing) = bindings.get(&new_port) {
            return Err(NavError::PortInUse {
                port: new_port,
                owner: Some(existing.descriptor.id.clone()),
            });
        }

        // Close old first: the old reader must be observably gone before the
        // new socket binds, so two sockets never claim the same equipment.
        let binding = bindings.remove(&old_port).expect("binding located above");
        let mut descriptor = binding.descriptor.clone();
        Self::close_binding(binding).await;
        descriptor.listen_port = new_port;

        self.bind_locked(&mut bindings, descriptor).await?;

        info!(equipment = id, old_port, new_port, "listening port moved");
        self.bus.publish(Event::now(
            EVENT_SOURCE,
            EventPayload::PortChanged {
                equipment_id: id.to_string(),
                old_port,
                new_port,
            },
        ));
        Ok(())
    }

    /// Whether any equipment is currently listening on `port`.
    pub async fn is_listening(&self, port: u16) -> bool {
        self.bindings.lock().await.contains_key(&port)
    }

    /// Whether `port` is bound by an equipment other than `exclude_id`.
    pub async fn is_port_in_use(&self, port: u16, exclude_id: Option<&str>) -> bool {
        self.bindings
            .lock()
            .await
            .get(&port)
            .is_some_and(|binding| exclude_id != Some(binding.descriptor.id.as_str()))
    }

    /// Equipment id owning the binding on `port`, if any.
    pub async fn owner_of(&self, port: u16) -> Option<String> {
        self.bindings
            .lock()
            .await
            .get(&port)
            .map(|binding| binding.descriptor.id.clone())
    }

    /// Close every binding.  Idempotent; safe to call during in-flight
    /// reads (reader tasks cancel at the socket await point).
    pub async fn stop(&self) {
        let drained: Vec<Binding> = {
            let mut bindings = self.bindings.lock().await;
            bindings.drain().map(|(_, binding)| binding).collect()
        };
        let count = drained.len();
        for binding in drained {
            Self::close_binding(binding).await;
        }
        if count > 0 {
            info!(closed = count, "socket manager stopped");
        }
    }

    // -----------------------------------------------------------------------
    // Binding internals
    // -----------------------------------------------------------------------

    /// Bind `descriptor`'s port and start its reader task.  Caller holds the
    /// binding-map lock.
    async fn bind_locked(
        &self,
        bindings: &mut HashMap<u16, Binding>,
        descriptor: EquipmentDescriptor,
    ) -> Result<(), NavError> {
        let port = descriptor.listen_port;
        if let Some(existing) = bindings.get(&port) {
            return Err(NavError::PortInUse {
                port,
                owner: Some(existing.descriptor.id.clone()),
            });
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => NavError::BindPermission {
                    port,
                    details: e.to_string(),
                },
                io::ErrorKind::AddrInUse => NavError::PortInUse { port, owner: None },
                _ => NavError::Bind {
                    port,
                    details: e.to_string(),
                },
            })?;

        info!(equipment = %descriptor.id, port, "listening");
        let reader = tokio::spawn(self.clone().read_loop(socket, port));
        bindings.insert(port, Binding { descriptor, reader });
        Ok(())
    }

    /// Abort a binding's reader task and wait for it to finish, which drops
    /// the socket and observably closes the port.
    async fn close_binding(binding: Binding) {
        binding.reader.abort();
        let _ = binding.reader.await;
    }

    /// Per-socket reader: one logically independent reader per bound port.
    async fn read_loop(self, socket: UdpSocket, port: u16) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => self.dispatch(port, &buf[..len], src).await,
                Err(e) => {
                    // Runtime fault after a successful bind: tear down this
                    // binding only; the process and other bindings carry on.
                    let fault = NavError::SocketFault {
                        port,
                        details: e.to_string(),
                    };
                    error!(port, error = %fault, "tearing down binding after socket fault");
                    self.bindings.lock().await.remove(&port);
                    break;
                }
            }
        }
    }

    /// Resolve the receiving port to its equipment and run the message
    /// pipeline.  A datagram on a port whose binding vanished mid-flight is
    /// an [`NavError::UnknownSource`]: logged with a full hex dump, dropped.
    async fn dispatch(&self, port: u16, payload: &[u8], src: SocketAddr) {
        let descriptor = {
            let bindings = self.bindings.lock().await;
            bindings.get(&port).map(|binding| binding.descriptor.clone())
        };
        match descriptor {
            Some(descriptor) => self.handle_datagram(&descriptor, payload, src),
            None => {
                let err = NavError::UnknownSource { port };
                warn!(
                    port,
                    source = %src,
                    payload = %hex_dump(payload),
                    "{err}; datagram dropped"
                );
            }
        }
    }

    /// The message pipeline: source identification → decode → state update →
    /// fanout.  Per-datagram errors never cross equipment boundaries.
    fn handle_datagram(&self, descriptor: &EquipmentDescriptor, payload: &[u8], src: SocketAddr) {
        match check_source(descriptor, src.ip()) {
            SourceCheck::Match | SourceCheck::LoopbackBypass => {}
            SourceCheck::Mismatch if self.strict_sources => {
                error!(
                    equipment = %descriptor.id,
                    expected = %descriptor.expected_source_ip,
                    actual = %src.ip(),
                    "source address mismatch (strict mode); identified by port"
                );
            }
            SourceCheck::Mismatch => {
                warn!(
                    equipment = %descriptor.id,
                    expected = %descriptor.expected_source_ip,
                    actual = %src.ip(),
                    "source address mismatch; identified by port"
                );
            }
        }

        match decode_packet(payload) {
            Ok((offset, decoded)) => {
                debug!(
                    equipment = %descriptor.id,
                    byte = %decoded.binary_digits(),
                    offset,
                    "monitor byte decoded"
                );
                let status = self.tracker.record_status(
                    &descriptor.id,
                    &decoded,
                    src.ip(),
                    src.port(),
                    descriptor.listen_port,
                );
                self.bus.publish(Event::now(
                    EVENT_SOURCE,
                    EventPayload::StatusChanged {
                        equipment_id: descriptor.id.clone(),
                        status,
                    },
                ));
            }
            Err(e) => {
                debug!(
                    equipment = %descriptor.id,
                    payload = %hex_dump(payload),
                    "{e}; packet dropped"
                );
            }
        }
    }
}

/// Space-separated upper-case hex rendering of a payload, for diagnostics.
fn hex_dump(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
