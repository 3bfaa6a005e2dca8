//! `navwatch-fanout` – real-time status delivery to subscribers.
//!
//! Bridges the internal event bus to every connected WebSocket client.
//! Delivery is best-effort and fire-and-forget: per-subscriber send order
//! equals publish order, a failed sink is logged and dropped without
//! affecting the others, and nothing is retried.

pub mod server;

pub use server::{FanoutServer, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_PORT};
