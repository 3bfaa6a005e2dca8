//! `navwatch-net` – per-equipment UDP ingestion.
//!
//! One dedicated UDP socket per enabled piece of equipment, owned by an
//! explicitly constructed [`SocketManager`].  Bindings can be added, removed,
//! and moved between ports at runtime without touching the others.
//!
//! # Modules
//!
//! - [`manager`] – [`SocketManager`]: port → binding map, reader tasks, and
//!   the per-datagram pipeline (identify → decode → record → publish).
//! - [`identify`] – source identification policy: the receiving port is the
//!   primary identity signal; source-IP checks warn but never drop.

pub mod identify;
pub mod manager;

pub use identify::SourceCheck;
pub use manager::SocketManager;
