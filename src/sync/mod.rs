//! Bidirectional replication between the edge and central stores.
//!
//! - **Conflict**: policy-driven winner selection for records changed on
//!   both sides since the last watermark
//! - **Engine**: the per-table pull/push/resolve pass
//! - **Orchestrator**: cycle scheduling, the single-cycle guard, cleanup
//! - **Hashing**: SHA256 content hashing for the identical-payload check
//! - **Status**: the operator-facing state snapshot
//!
//! # Architecture
//!
//! Writes are captured into the durable operation log while the edge runs
//! offline. Each sync cycle walks every registered table: pull central
//! changes since the table's watermark, push pending local operations,
//! and hand records changed on both sides to the resolver. The watermark
//! only advances after a pass with no failures, so partial passes re-cover
//! the same window and rely on apply idempotency.

pub mod conflict;
pub mod engine;
pub mod hash;
pub mod orchestrator;
pub mod status;

pub use conflict::{ConflictPolicy, ConflictSide, Resolution, resolve, spurious};
pub use engine::{CycleStats, SyncEngine, TablePassStats};
pub use hash::content_hash;
pub use orchestrator::SyncOrchestrator;
pub use status::{SyncStatus, get_sync_status, print_status};
