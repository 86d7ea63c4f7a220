//! The per-table replication pass.
//!
//! One pass over one table: pull remote changes since the watermark, push
//! the pending local operations, detect collisions, and hand those to the
//! resolver. Per-record failures are isolated; the watermark only advances
//! after a pass with no failures, so a partial pass re-covers the same
//! window on the next cycle and leans on apply idempotency.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{ConflictRecord, OperationType, Payload, SyncOperation, Winner};
use crate::registry::Table;
use crate::store::{CentralStore, ChangedRecord, LocalStore, OperationLog};
use crate::sync::conflict::{self, ConflictPolicy, ConflictSide};

/// Outcome counters for one table pass.
#[derive(Debug, Clone, Serialize)]
pub struct TablePassStats {
    pub table: String,
    /// Remote changes applied to the local store.
    pub pulled_applied: usize,
    /// Pending operations pushed and marked synced.
    pub pushed_synced: usize,
    /// Collisions decided automatically by policy.
    pub conflicts_resolved: usize,
    /// Collisions parked for manual resolution.
    pub conflicts_deferred: usize,
    /// Collisions where both sides carried identical content.
    pub spurious_conflicts: usize,
    /// Records skipped because an open conflict freezes them.
    pub frozen_skipped: usize,
    /// Per-record apply failures (the pass continued past them).
    pub failures: usize,
    /// Whether the watermark advanced after this pass.
    pub watermark_advanced: bool,
}

impl TablePassStats {
    fn new(table: Table) -> Self {
        Self {
            table: table.name().to_string(),
            pulled_applied: 0,
            pushed_synced: 0,
            conflicts_resolved: 0,
            conflicts_deferred: 0,
            spurious_conflicts: 0,
            frozen_skipped: 0,
            failures: 0,
            watermark_advanced: false,
        }
    }
}

/// Outcome of one full cycle across every registered table.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: chrono::DateTime<Utc>,
    pub tables: Vec<TablePassStats>,
    /// Tables whose pass failed wholesale (e.g. the pull query itself).
    pub failed_tables: usize,
}

impl CycleStats {
    /// True when every table pass completed without a single failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_tables == 0 && self.tables.iter().all(|t| t.failures == 0)
    }
}

/// Drives the pull/push/resolve pass for each table.
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    central: Arc<dyn CentralStore>,
    oplog: OperationLog,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        central: Arc<dyn CentralStore>,
        oplog: OperationLog,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            central,
            oplog,
            config,
        }
    }

    #[must_use]
    pub fn oplog(&self) -> &OperationLog {
        &self.oplog
    }

    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.config.policy
    }

    /// Run one pass over every registered table. A wholesale table failure
    /// is logged and counted; the remaining tables still get their pass.
    pub async fn sync_all(&self) -> CycleStats {
        let started_at = Utc::now();
        let mut tables = Vec::with_capacity(Table::ALL.len());
        let mut failed_tables = 0;

        for table in Table::ALL {
            match self.sync_table(table).await {
                Ok(stats) => tables.push(stats),
                Err(e) => {
                    tracing::warn!(table = table.name(), error = %e, "table pass failed");
                    failed_tables += 1;
                }
            }
        }

        CycleStats {
            started_at,
            finished_at: Utc::now(),
            tables,
            failed_tables,
        }
    }

    /// One bidirectional pass over a single table.
    pub async fn sync_table(&self, table: Table) -> Result<TablePassStats> {
        // Captured before the pull so changes landing mid-pass stay inside
        // the next window instead of slipping between watermarks.
        let cycle_start = Utc::now();
        let since = self.oplog.watermark(table)?;
        let batch = self.config.sync_batch_size;
        let mut stats = TablePassStats::new(table);
        let mut clean = true;
        // Cleared when part of the window could not be covered this pass;
        // the watermark then holds so the next pass re-covers it.
        let mut window_complete = true;

        let pulled = self
            .pull_window(table, since, batch, &mut window_complete)
            .await?;
        // The push set is batch-limited, but collision detection must see
        // every pending record or a remote change would overwrite a local
        // write waiting beyond the batch.
        let pending = self.oplog.list_pending(Some(table), batch)?;
        let pending_records = self.oplog.pending_record_ids(table)?;

        tracing::debug!(
            table = table.name(),
            pulled = pulled.len(),
            pending = pending.len(),
            since = %since,
            "table pass"
        );

        let colliding: HashSet<&str> = pulled
            .iter()
            .filter(|rec| pending_records.contains(rec.record_id.as_str()))
            .map(|rec| rec.record_id.as_str())
            .collect();

        // Remote-only changes go straight into the local store.
        for rec in pulled.iter().filter(|r| !colliding.contains(r.record_id.as_str())) {
            if self.oplog.has_open_conflict(table, &rec.record_id)? {
                stats.frozen_skipped += 1;
                continue;
            }
            let op = if rec.deleted {
                OperationType::Delete
            } else {
                OperationType::Update
            };
            if let Err(e) = self.local.apply(table, op, &rec.record_id, &rec.payload).await {
                tracing::warn!(
                    table = table.name(),
                    record = rec.record_id,
                    error = %e,
                    "pull apply failed"
                );
                stats.failures += 1;
                clean = false;
            } else {
                stats.pulled_applied += 1;
            }
        }

        // Local-only pending operations get pushed to the central store.
        for op in pending.iter().filter(|op| !colliding.contains(op.record_id.as_str())) {
            if self.oplog.has_open_conflict(table, &op.record_id)? {
                self.oplog.mark_conflict(&op.id)?;
                stats.frozen_skipped += 1;
                continue;
            }
            if !self.push_operation(table, op, &mut stats).await? {
                clean = false;
            }
        }

        // Collisions: both sides changed the same record since the watermark.
        let mut pending_by_record: HashMap<&str, Vec<&SyncOperation>> = HashMap::new();
        for op in &pending {
            pending_by_record
                .entry(op.record_id.as_str())
                .or_default()
                .push(op);
        }
        for rec in pulled.iter().filter(|r| colliding.contains(r.record_id.as_str())) {
            // A colliding record whose pending operations sit beyond the
            // batch is left untouched; the watermark holds so it is pulled
            // again once those operations reach the front of the queue.
            let Some(ops) = pending_by_record.get(rec.record_id.as_str()) else {
                window_complete = false;
                continue;
            };
            if !self.handle_collision(table, rec, ops, &mut stats).await? {
                clean = false;
            }
        }

        if clean && window_complete {
            self.oplog.set_watermark(table, cycle_start)?;
            stats.watermark_advanced = true;
        }
        Ok(stats)
    }

    /// Drain the remote change window in batch-sized pages. The window is
    /// only complete once a short page comes back; advancing the watermark
    /// past a truncated page would orphan the records behind it.
    async fn pull_window(
        &self,
        table: Table,
        since: chrono::DateTime<Utc>,
        batch: usize,
        window_complete: &mut bool,
    ) -> Result<Vec<ChangedRecord>> {
        let mut pulled: Vec<ChangedRecord> = Vec::new();
        let mut cursor = since;
        loop {
            let page = self
                .with_timeout(self.central.changed_since(table, cursor, batch))
                .await?;
            let full = page.len() == batch && batch > 0;
            let newest = page.iter().map(|r| r.updated_at).max();
            pulled.extend(page);
            if !full {
                break;
            }
            match newest {
                Some(ts) if ts > cursor => cursor = ts,
                // A full page that does not move the cursor cannot be
                // paged past; hold the watermark and retry next cycle.
                _ => {
                    *window_complete = false;
                    break;
                }
            }
        }

        // A record updated between page fetches can show up twice; keep
        // the newest occurrence.
        if pulled.len() > batch {
            let mut seen: HashSet<String> = HashSet::new();
            pulled.reverse();
            pulled.retain(|r| seen.insert(r.record_id.clone()));
            pulled.reverse();
        }
        Ok(pulled)
    }

    /// Push one pending operation. Returns false when the push failed and
    /// the watermark must not advance.
    async fn push_operation(
        &self,
        table: Table,
        op: &SyncOperation,
        stats: &mut TablePassStats,
    ) -> Result<bool> {
        self.oplog.mark_in_progress(&op.id)?;
        let outcome = self
            .with_timeout(
                self.central
                    .apply(table, op.operation_type, &op.record_id, &op.payload),
            )
            .await;

        match outcome {
            Ok(()) => {
                self.oplog.mark_synced(&op.id)?;
                stats.pushed_synced += 1;
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                let retries = self.oplog.increment_retry(&op.id, &e.to_string())?;
                if retries >= self.config.retry_attempts {
                    tracing::warn!(
                        operation = op.id,
                        retries,
                        error = %e,
                        "retry budget exhausted, operation failed"
                    );
                    self.oplog.mark_failed(&op.id, &e.to_string())?;
                } else {
                    self.oplog.mark_pending(&op.id)?;
                }
                stats.failures += 1;
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(operation = op.id, error = %e, "push failed permanently");
                self.oplog.mark_failed(&op.id, &e.to_string())?;
                stats.failures += 1;
                Ok(false)
            }
        }
    }

    /// Decide one collision. Returns false when an apply failed.
    async fn handle_collision(
        &self,
        table: Table,
        remote: &ChangedRecord,
        ops: &[&SyncOperation],
        stats: &mut TablePassStats,
    ) -> Result<bool> {
        // The newest pending operation stands for the local side; earlier
        // pending writes to the same record are superseded by it.
        let rep = ops.last().ok_or_else(|| Error::Other("empty collision group".into()))?;
        let local_side = ConflictSide::new(version_of(rep), rep.captured_at);
        let remote_payload = if remote.deleted {
            Payload::new()
        } else {
            remote.payload.clone()
        };
        let remote_side = ConflictSide::new(remote_payload, remote.updated_at);

        if conflict::spurious(&local_side, &remote_side) {
            for op in ops {
                self.oplog.mark_synced(&op.id)?;
            }
            stats.spurious_conflicts += 1;
            return Ok(true);
        }

        match conflict::resolve(&local_side, &remote_side, self.config.policy) {
            Some(res) => {
                match self.apply_winner(table, &remote.record_id, &res.record).await {
                    Ok(()) => {
                        for op in ops {
                            self.oplog.mark_synced(&op.id)?;
                        }
                        tracing::info!(
                            table = table.name(),
                            record = remote.record_id,
                            winner = %res.winner,
                            policy = %self.config.policy,
                            "conflict resolved"
                        );
                        stats.conflicts_resolved += 1;
                        Ok(true)
                    }
                    Err(e) => {
                        tracing::warn!(
                            table = table.name(),
                            record = remote.record_id,
                            error = %e,
                            "conflict winner apply failed"
                        );
                        self.oplog.mark_pending(&rep.id)?;
                        stats.failures += 1;
                        Ok(false)
                    }
                }
            }
            None => {
                let record = ConflictRecord {
                    id: Uuid::new_v4().to_string(),
                    table_name: table.name().to_string(),
                    record_id: remote.record_id.clone(),
                    local_updated_at: local_side.updated_at,
                    remote_updated_at: remote_side.updated_at,
                    local_version: local_side.payload,
                    remote_version: remote_side.payload,
                    detected_at: Utc::now(),
                    resolution: None,
                    resolved_by: None,
                };
                self.oplog.insert_conflict(&record)?;
                for op in ops {
                    self.oplog.mark_conflict(&op.id)?;
                }
                tracing::info!(
                    table = table.name(),
                    record = remote.record_id,
                    conflict = record.id,
                    "conflict parked for manual resolution"
                );
                stats.conflicts_deferred += 1;
                Ok(true)
            }
        }
    }

    /// Apply the winning version to both stores so they converge. An empty
    /// version map stands for a deletion.
    async fn apply_winner(&self, table: Table, record_id: &str, record: &Payload) -> Result<()> {
        let op = if record.is_empty() {
            OperationType::Delete
        } else {
            OperationType::Update
        };
        self.local.apply(table, op, record_id, record).await?;
        self.with_timeout(self.central.apply(table, op, record_id, record))
            .await
    }

    /// Re-run the resolver over durable open conflicts. A no-op under the
    /// manual policy; after a policy change to an automatic one this drains
    /// the parked set. Returns the number resolved.
    pub async fn process_open_conflicts(&self) -> Result<usize> {
        if self.config.policy == ConflictPolicy::Manual {
            return Ok(0);
        }
        let mut resolved = 0;
        for c in self.oplog.list_conflicts()? {
            let table = Table::parse(&c.table_name)?;
            let local_side = ConflictSide::new(c.local_version.clone(), c.local_updated_at);
            let remote_side = ConflictSide::new(c.remote_version.clone(), c.remote_updated_at);
            let Some(res) = conflict::resolve(&local_side, &remote_side, self.config.policy) else {
                continue;
            };
            self.apply_winner(table, &c.record_id, &res.record).await?;
            self.oplog
                .remove_conflict(&c.id, res.winner, &self.config.policy.to_string())?;
            self.release_frozen_operations(&c.table_name, &c.record_id)?;
            resolved += 1;
        }
        Ok(resolved)
    }

    /// Resolve one parked conflict with an operator-chosen winner: apply
    /// the winning version to both stores, drop the conflict, and unfreeze
    /// the suspended operations.
    pub async fn resolve_manually(
        &self,
        conflict_id: &str,
        winner: Winner,
        resolved_by: &str,
    ) -> Result<()> {
        let c = self
            .oplog
            .get_conflict(conflict_id)?
            .ok_or_else(|| Error::ConflictNotFound {
                id: conflict_id.to_string(),
            })?;
        let table = Table::parse(&c.table_name)?;
        let record = match winner {
            Winner::Local => &c.local_version,
            Winner::Remote => &c.remote_version,
        };
        self.apply_winner(table, &c.record_id, record).await?;
        self.oplog.remove_conflict(&c.id, winner, resolved_by)?;
        self.release_frozen_operations(&c.table_name, &c.record_id)?;
        Ok(())
    }

    /// Mark the operations suspended behind a resolved conflict as synced;
    /// the winning version already covers them.
    fn release_frozen_operations(&self, table_name: &str, record_id: &str) -> Result<()> {
        use crate::model::OperationStatus;
        for op in self.oplog.list_operations(Some(OperationStatus::Conflict))? {
            if op.table_name == table_name && op.record_id == record_id {
                self.oplog.mark_synced(&op.id)?;
            }
        }
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match tokio::time::timeout(self.config.table_op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(self.config.table_op_timeout)),
        }
    }
}

/// The version a pending operation asserts: its payload, or an empty map
/// for a deletion.
fn version_of(op: &SyncOperation) -> Payload {
    if op.operation_type == OperationType::Delete {
        Payload::new()
    } else {
        op.payload.clone()
    }
}
