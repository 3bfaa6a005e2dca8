//! `navwatch-bus` – the status event channel.
//!
//! Decouples the socket layer from everything that wants to observe it: the
//! socket manager publishes [`Event`]s here and the fanout server, the
//! administrative layer, and tests subscribe independently.
//!
//! Built on [`tokio::sync::broadcast`] so every subscriber receives every
//! event without any single subscriber blocking the others.  There is no
//! ambient singleton: each [`EventBus`] is explicitly constructed and owned,
//! so multiple buses coexist in tests.

pub mod bus;

pub use bus::{EventBus, EventStream};
