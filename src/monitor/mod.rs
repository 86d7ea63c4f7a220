//! Background observation of the replication pair.
//!
//! - **Connection**: periodic reachability probes of the central store
//!   with a durable transition history and subscriber callbacks
//! - **Health**: threshold checks over sampled central-store metrics
//!
//! Both monitors are observational; only the connection monitor's
//! offline-to-online transition feeds back into sync scheduling, through
//! a callback the caller wires up.

pub mod connection;
pub mod health;

pub use connection::ConnectionMonitor;
pub use health::{HealthMonitor, HealthReport};
