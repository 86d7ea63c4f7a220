//! Store interfaces and implementations.
//!
//! The engine talks to both sides of the replication pair through two
//! narrow traits:
//!
//! - [`LocalStore`], the edge store collocated with the application
//! - [`CentralStore`], the remote store, reachable only when online
//!
//! Both expose a record-level "changed since" query and direct apply
//! operations; the central side additionally answers reachability probes
//! and metrics samples. [`OperationLog`] is the durable local log of
//! captured writes, watermarks, connection history, and open conflicts.

mod central;
mod local;
mod oplog;

pub use central::HttpCentralStore;
pub use local::SqliteLocalStore;
pub use oplog::{OperationLog, OperationStats};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{MetricsSnapshot, OperationType, Payload};
use crate::registry::Table;

/// A record as returned by a changed-since query.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChangedRecord {
    pub record_id: String,
    pub payload: Payload,
    pub updated_at: DateTime<Utc>,
    /// True when the change is a deletion (tombstone).
    #[serde(default)]
    pub deleted: bool,
}

/// The edge store collocated with the application.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Records in `table` changed strictly after `since`, ordered by
    /// `updated_at` ascending.
    async fn changed_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>>;

    /// Fetch one record by primary key, tombstones included.
    async fn get(&self, table: Table, record_id: &str) -> Result<Option<ChangedRecord>>;

    /// Apply a write directly. Create/update are upserts and delete is a
    /// no-op when the row is already gone, so replaying an apply after a
    /// crash converges to the same state.
    async fn apply(
        &self,
        table: Table,
        op: OperationType,
        record_id: &str,
        payload: &Payload,
    ) -> Result<()>;
}

/// The remote store, reachable only while connectivity holds.
#[async_trait]
pub trait CentralStore: Send + Sync {
    /// Cheap round-trip; returns the measured latency.
    async fn probe(&self, timeout: Duration) -> Result<Duration>;

    /// Records in `table` changed strictly after `since`, ordered by
    /// `updated_at` ascending. The engine pages through full batches by
    /// re-querying from the newest timestamp returned.
    async fn changed_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>>;

    /// Apply a write directly, with the same idempotency contract as
    /// [`LocalStore::apply`].
    async fn apply(
        &self,
        table: Table,
        op: OperationType,
        record_id: &str,
        payload: &Payload,
    ) -> Result<()>;

    /// Sample the central store's performance gauges.
    async fn sample_metrics(&self) -> Result<MetricsSnapshot>;
}
