//! `navwatch-tracker` – live equipment state and history.
//!
//! One [`EquipmentTracker`] holds the current [`EquipmentStatus`] per
//! equipment id plus a bounded FIFO history ring of past snapshots.  A
//! periodic liveness sweep demotes equipment whose last packet is older than
//! the configured timeout to `connected = false`, preserving the last-known
//! path state and severity for operator visibility.

pub mod tracker;

pub use tracker::{EquipmentTracker, DEFAULT_HISTORY_CAPACITY, DEFAULT_LIVENESS_TIMEOUT};
