//! clinsync - offline-first replication for clinic edge deployments
//!
//! This crate keeps a clinic's edge SQLite store and the central store
//! convergent across connectivity outages: writes are captured into a
//! durable operation log while offline and replayed when the central
//! store is reachable again.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (SyncOperation, ConflictRecord, health types)
//! - [`registry`] - The closed set of replicated tables
//! - [`store`] - Operation log, edge record store, central-store client
//! - [`monitor`] - Connection and health monitoring loops
//! - [`sync`] - Conflict resolution, the table pass, cycle orchestration
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
