//! Durable operation log on SQLite.
//!
//! Single database holding the captured-write log, per-table watermarks,
//! connection-status history, and open conflict records. Everything the
//! engine must not lose across a restart lives here. Timestamps are stored
//! as INTEGER Unix milliseconds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    ConflictRecord, ConnectionSample, ConnectionState, OperationStatus, OperationType, Payload,
    Source, SyncOperation, Winner,
};
use crate::registry::Table;

/// The complete SQL schema for the operation log.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS sync_operations (
    id TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    source TEXT NOT NULL,
    captured_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_operations_status ON sync_operations(status);
CREATE INDEX IF NOT EXISTS idx_sync_operations_table ON sync_operations(table_name, status);
CREATE INDEX IF NOT EXISTS idx_sync_operations_captured ON sync_operations(captured_at);

CREATE TABLE IF NOT EXISTS connection_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    details TEXT
);

CREATE INDEX IF NOT EXISTS idx_connection_status_ts ON connection_status(timestamp DESC);

CREATE TABLE IF NOT EXISTS sync_watermarks (
    table_name TEXT PRIMARY KEY,
    last_synced_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    local_version TEXT NOT NULL,
    remote_version TEXT NOT NULL,
    local_updated_at INTEGER NOT NULL,
    remote_updated_at INTEGER NOT NULL,
    detected_at INTEGER NOT NULL,
    resolution TEXT,
    resolved_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(table_name, record_id);
";

/// Counts of logged operations by status and type.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OperationStats {
    pub by_status: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    /// Operations captured in the last hour.
    pub recent_activity: usize,
}

impl OperationStats {
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.by_status.get(&status.to_string()).copied().unwrap_or(0)
    }
}

/// Durable store for captured operations, watermarks, connection history,
/// and open conflicts.
///
/// Cheap to clone; all clones share one connection behind a mutex. The
/// critical sections are single local SQLite statements, so contention is
/// bounded by statement latency.
#[derive(Debug, Clone)]
pub struct OperationLog {
    conn: Arc<Mutex<Connection>>,
}

impl OperationLog {
    /// Open (creating if needed) the operation log at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema fails to apply.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open an in-memory operation log (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("operation log mutex poisoned".into()))
    }

    // ── Operations ────────────────────────────────────────────

    /// Durably record a captured write. The row is committed before this
    /// returns; a persistence failure propagates to the caller so the
    /// capturing transaction fails together with the capture.
    pub fn record(
        &self,
        table: Table,
        operation_type: OperationType,
        record_id: &str,
        payload: Payload,
        source: Source,
    ) -> Result<SyncOperation> {
        let op = SyncOperation {
            id: Uuid::new_v4().to_string(),
            table_name: table.name().to_string(),
            operation_type,
            record_id: record_id.to_string(),
            payload,
            source,
            captured_at: Utc::now(),
            status: OperationStatus::Pending,
            retry_count: 0,
            last_error: None,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_operations
             (id, table_name, operation_type, record_id, payload, source, captured_at, status, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                op.id,
                op.table_name,
                op.operation_type.to_string(),
                op.record_id,
                serde_json::to_string(&op.payload)?,
                op.source.to_string(),
                op.captured_at.timestamp_millis(),
                op.status.to_string(),
            ],
        )?;

        Ok(op)
    }

    /// Pending operations, oldest first, optionally scoped to one table.
    pub fn list_pending(&self, table: Option<Table>, limit: usize) -> Result<Vec<SyncOperation>> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        if let Some(table) = table {
            let mut stmt = conn.prepare(
                "SELECT id, table_name, operation_type, record_id, payload, source,
                        captured_at, status, retry_count, last_error
                 FROM sync_operations
                 WHERE status = 'pending' AND table_name = ?1
                 ORDER BY captured_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![table.name(), limit as i64], row_to_operation)?;
            for row in rows {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, table_name, operation_type, record_id, payload, source,
                        captured_at, status, retry_count, last_error
                 FROM sync_operations
                 WHERE status = 'pending'
                 ORDER BY captured_at ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], row_to_operation)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// All operations, newest first, with an optional status filter.
    pub fn list_operations(&self, status: Option<OperationStatus>) -> Result<Vec<SyncOperation>> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        if let Some(status) = status {
            let mut stmt = conn.prepare(
                "SELECT id, table_name, operation_type, record_id, payload, source,
                        captured_at, status, retry_count, last_error
                 FROM sync_operations
                 WHERE status = ?1
                 ORDER BY captured_at DESC",
            )?;
            let rows = stmt.query_map(params![status.to_string()], row_to_operation)?;
            for row in rows {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, table_name, operation_type, record_id, payload, source,
                        captured_at, status, retry_count, last_error
                 FROM sync_operations
                 ORDER BY captured_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_operation)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// Every record id with a pending operation for `table`, regardless of
    /// any batch limit applied to the operations themselves. Collision
    /// detection needs the full set; an id-only query keeps that cheap.
    pub fn pending_record_ids(&self, table: Table) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT record_id FROM sync_operations
             WHERE table_name = ?1 AND status = 'pending'",
        )?;
        let rows = stmt.query_map(params![table.name()], |row| row.get(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Fetch one operation by id.
    pub fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, table_name, operation_type, record_id, payload, source,
                    captured_at, status, retry_count, last_error
             FROM sync_operations WHERE id = ?1",
            params![id],
            row_to_operation,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn mark_in_progress(&self, id: &str) -> Result<()> {
        self.set_status(id, OperationStatus::InProgress, None)
    }

    pub fn mark_synced(&self, id: &str) -> Result<()> {
        self.set_status(id, OperationStatus::Synced, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.set_status(id, OperationStatus::Failed, Some(error))
    }

    pub fn mark_conflict(&self, id: &str) -> Result<()> {
        self.set_status(id, OperationStatus::Conflict, None)
    }

    /// Put an operation back to `pending` (between retry attempts, or when
    /// a conflict it was suspended on has been resolved toward local).
    pub fn mark_pending(&self, id: &str) -> Result<()> {
        self.set_status(id, OperationStatus::Pending, None)
    }

    fn set_status(&self, id: &str, status: OperationStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_operations SET status = ?2, last_error = COALESCE(?3, last_error)
             WHERE id = ?1",
            params![id, status.to_string(), error],
        )?;
        if changed == 0 {
            return Err(Error::OperationNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Bump the retry counter, recording the error, and return the new count.
    pub fn increment_retry(&self, id: &str, error: &str) -> Result<u32> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_operations
             SET retry_count = retry_count + 1, last_error = ?2
             WHERE id = ?1",
            params![id, error],
        )?;
        if changed == 0 {
            return Err(Error::OperationNotFound { id: id.to_string() });
        }
        let count: u32 = conn.query_row(
            "SELECT retry_count FROM sync_operations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete synced operations captured more than `days` days ago.
    /// Returns the number of rows removed.
    pub fn purge_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM sync_operations WHERE captured_at < ?1 AND status = 'synced'",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(removed)
    }

    /// Counts by status and operation type plus last-hour activity.
    pub fn stats(&self) -> Result<OperationStats> {
        let conn = self.conn()?;
        let mut stats = OperationStats::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM sync_operations GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.by_status.insert(status, count as usize);
        }

        let mut stmt = conn
            .prepare("SELECT operation_type, COUNT(*) FROM sync_operations GROUP BY operation_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (op, count) = row?;
            stats.by_type.insert(op, count as usize);
        }

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        stats.recent_activity = conn.query_row(
            "SELECT COUNT(*) FROM sync_operations WHERE captured_at > ?1",
            params![hour_ago.timestamp_millis()],
            |row| row.get::<_, i64>(0),
        )? as usize;

        Ok(stats)
    }

    // ── Watermarks ────────────────────────────────────────────

    /// Last clean sync timestamp for `table`; epoch zero on first run.
    pub fn watermark(&self, table: Table) -> Result<DateTime<Utc>> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn
            .query_row(
                "SELECT last_synced_at FROM sync_watermarks WHERE table_name = ?1",
                params![table.name()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(millis.map_or_else(epoch, millis_to_datetime))
    }

    /// Advance (or set) the watermark for `table`.
    pub fn set_watermark(&self, table: Table, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_watermarks (table_name, last_synced_at) VALUES (?1, ?2)
             ON CONFLICT(table_name) DO UPDATE SET last_synced_at = excluded.last_synced_at",
            params![table.name(), at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Most recent watermark across all tables, if any table has synced.
    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MAX(last_synced_at) FROM sync_watermarks",
            [],
            |row| row.get(0),
        )?;
        Ok(millis.map(millis_to_datetime))
    }

    // ── Connection history ────────────────────────────────────

    /// Append a connection-status sample.
    pub fn record_connection(&self, state: ConnectionState, details: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO connection_status (status, timestamp, details) VALUES (?1, ?2, ?3)",
            params![state.to_string(), Utc::now().timestamp_millis(), details],
        )?;
        Ok(())
    }

    /// Most recent connection samples, newest first.
    pub fn connection_history(&self, limit: usize) -> Result<Vec<ConnectionSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, timestamp, details FROM connection_status
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (status, millis, details) = row?;
            out.push(ConnectionSample {
                state: status
                    .parse()
                    .map_err(|e: String| Error::InvalidStatus(e))?,
                timestamp: millis_to_datetime(millis),
                details,
            });
        }
        Ok(out)
    }

    /// Keep only the newest `keep` samples.
    pub fn prune_connection_history(&self, keep: usize) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM connection_status WHERE id NOT IN
             (SELECT id FROM connection_status ORDER BY timestamp DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(removed)
    }

    // ── Conflicts ─────────────────────────────────────────────

    /// Persist a newly detected conflict.
    pub fn insert_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_conflicts
             (id, table_name, record_id, local_version, remote_version,
              local_updated_at, remote_updated_at, detected_at, resolution, resolved_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                conflict.id,
                conflict.table_name,
                conflict.record_id,
                serde_json::to_string(&conflict.local_version)?,
                serde_json::to_string(&conflict.remote_version)?,
                conflict.local_updated_at.timestamp_millis(),
                conflict.remote_updated_at.timestamp_millis(),
                conflict.detected_at.timestamp_millis(),
                conflict.resolution.map(|w| w.to_string()),
                conflict.resolved_by,
            ],
        )?;
        Ok(())
    }

    /// All open (unresolved) conflicts, oldest first.
    pub fn list_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, table_name, record_id, local_version, remote_version,
                    local_updated_at, remote_updated_at, detected_at, resolution, resolved_by
             FROM sync_conflicts
             WHERE resolution IS NULL
             ORDER BY detected_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_conflict)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Fetch one conflict by id.
    pub fn get_conflict(&self, id: &str) -> Result<Option<ConflictRecord>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, table_name, record_id, local_version, remote_version,
                        local_updated_at, remote_updated_at, detected_at, resolution, resolved_by
                 FROM sync_conflicts WHERE id = ?1",
                params![id],
                row_to_conflict,
            )
            .optional()?;
        found.transpose()
    }

    /// True when the record has an unresolved conflict blocking its sync.
    pub fn has_open_conflict(&self, table: Table, record_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts
             WHERE table_name = ?1 AND record_id = ?2 AND resolution IS NULL",
            params![table.name(), record_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remove a conflict from the pending set after resolution.
    pub fn remove_conflict(&self, id: &str, winner: Winner, resolved_by: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM sync_conflicts WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::ConflictNotFound { id: id.to_string() });
        }
        tracing::debug!(conflict = id, %winner, resolved_by, "conflict resolved");
        Ok(())
    }

    /// Open-conflict count for status reporting.
    pub fn conflict_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolution IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).single().unwrap_or_else(Utc::now)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncOperation> {
    let payload: String = row.get(4)?;
    let op_type: String = row.get(2)?;
    let source: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(SyncOperation {
        id: row.get(0)?,
        table_name: row.get(1)?,
        operation_type: op_type.parse().unwrap_or(OperationType::Update),
        record_id: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        source: source.parse().unwrap_or(Source::Edge),
        captured_at: millis_to_datetime(row.get(6)?),
        status: status.parse().unwrap_or(OperationStatus::Pending),
        retry_count: row.get(8)?,
        last_error: row.get(9)?,
    })
}

fn row_to_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ConflictRecord>> {
    let local: String = row.get(3)?;
    let remote: String = row.get(4)?;
    let resolution: Option<String> = row.get(8)?;
    Ok((|| {
        Ok(ConflictRecord {
            id: row.get(0)?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            local_version: serde_json::from_str(&local)?,
            remote_version: serde_json::from_str(&remote)?,
            local_updated_at: millis_to_datetime(row.get(5)?),
            remote_updated_at: millis_to_datetime(row.get(6)?),
            detected_at: millis_to_datetime(row.get(7)?),
            resolution: resolution
                .map(|r| r.parse().map_err(|e: String| Error::InvalidStatus(e)))
                .transpose()?,
            resolved_by: row.get(9)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn record_and_list_pending() {
        let log = OperationLog::open_memory().unwrap();
        let op = log
            .record(
                Table::Patients,
                OperationType::Create,
                "p1",
                payload(&[("id", json!("p1")), ("name", json!("Ada"))]),
                Source::Edge,
            )
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);

        let pending = log.list_pending(Some(Table::Patients), 100).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, "p1");

        let other = log.list_pending(Some(Table::Users), 100).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn status_transitions_persist() {
        let log = OperationLog::open_memory().unwrap();
        let op = log
            .record(Table::Users, OperationType::Update, "u1", Payload::new(), Source::Edge)
            .unwrap();

        log.mark_in_progress(&op.id).unwrap();
        log.mark_synced(&op.id).unwrap();

        let loaded = log.get_operation(&op.id).unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Synced);
        assert!(log.list_pending(None, 100).unwrap().is_empty());
    }

    #[test]
    fn retry_counter_and_failure() {
        let log = OperationLog::open_memory().unwrap();
        let op = log
            .record(Table::Appointments, OperationType::Update, "a1", Payload::new(), Source::Edge)
            .unwrap();

        assert_eq!(log.increment_retry(&op.id, "timeout").unwrap(), 1);
        assert_eq!(log.increment_retry(&op.id, "timeout").unwrap(), 2);
        log.mark_failed(&op.id, "max retries reached").unwrap();

        let loaded = log.get_operation(&op.id).unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Failed);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.last_error.as_deref(), Some("max retries reached"));
    }

    #[test]
    fn purge_only_removes_synced() {
        let log = OperationLog::open_memory().unwrap();
        let synced = log
            .record(Table::Users, OperationType::Create, "u1", Payload::new(), Source::Edge)
            .unwrap();
        let pending = log
            .record(Table::Users, OperationType::Create, "u2", Payload::new(), Source::Edge)
            .unwrap();
        log.mark_synced(&synced.id).unwrap();

        // Retention of -1 days puts the cutoff in the future, so every
        // synced row is past it.
        let removed = log.purge_older_than(-1).unwrap();
        assert_eq!(removed, 1);
        assert!(log.get_operation(&synced.id).unwrap().is_none());
        assert!(log.get_operation(&pending.id).unwrap().is_some());
    }

    #[test]
    fn pending_record_ids_ignore_the_batch_limit() {
        let log = OperationLog::open_memory().unwrap();
        for i in 0..5 {
            log.record(
                Table::Users,
                OperationType::Update,
                &format!("u{i}"),
                Payload::new(),
                Source::Edge,
            )
            .unwrap();
        }

        assert_eq!(log.list_pending(Some(Table::Users), 2).unwrap().len(), 2);
        let ids = log.pending_record_ids(Table::Users).unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains("u4"));
    }

    #[test]
    fn watermark_defaults_to_epoch_and_advances() {
        let log = OperationLog::open_memory().unwrap();
        assert_eq!(log.watermark(Table::Patients).unwrap().timestamp_millis(), 0);

        let now = Utc::now();
        log.set_watermark(Table::Patients, now).unwrap();
        assert_eq!(
            log.watermark(Table::Patients).unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
        assert!(log.last_sync_at().unwrap().is_some());
    }

    #[test]
    fn connection_history_is_bounded() {
        let log = OperationLog::open_memory().unwrap();
        for _ in 0..5 {
            log.record_connection(ConnectionState::Online, None).unwrap();
        }
        log.record_connection(ConnectionState::Offline, Some("probe timeout"))
            .unwrap();

        let history = log.connection_history(3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].state, ConnectionState::Offline);

        log.prune_connection_history(2).unwrap();
        assert_eq!(log.connection_history(100).unwrap().len(), 2);
    }

    #[test]
    fn conflicts_persist_until_resolved() {
        let log = OperationLog::open_memory().unwrap();
        let conflict = ConflictRecord {
            id: "c1".into(),
            table_name: "appointments".into(),
            record_id: "a1".into(),
            local_version: payload(&[("notes", json!("edge"))]),
            remote_version: payload(&[("status", json!("confirmed"))]),
            local_updated_at: Utc::now(),
            remote_updated_at: Utc::now(),
            detected_at: Utc::now(),
            resolution: None,
            resolved_by: None,
        };
        log.insert_conflict(&conflict).unwrap();

        assert!(log.has_open_conflict(Table::Appointments, "a1").unwrap());
        assert_eq!(log.conflict_count().unwrap(), 1);
        assert_eq!(log.list_conflicts().unwrap().len(), 1);

        log.remove_conflict("c1", Winner::Remote, "manual").unwrap();
        assert!(!log.has_open_conflict(Table::Appointments, "a1").unwrap());
        assert_eq!(log.conflict_count().unwrap(), 0);
    }

    #[test]
    fn stats_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("oplog.db");

        {
            let log = OperationLog::open(&path).unwrap();
            let op = log
                .record(Table::Users, OperationType::Create, "u1", Payload::new(), Source::Edge)
                .unwrap();
            log.mark_synced(&op.id).unwrap();
            log.record(Table::Users, OperationType::Update, "u1", Payload::new(), Source::Edge)
                .unwrap();
        }

        let log = OperationLog::open(&path).unwrap();
        let stats = log.stats().unwrap();
        assert_eq!(stats.count(OperationStatus::Synced), 1);
        assert_eq!(stats.count(OperationStatus::Pending), 1);
        assert_eq!(stats.by_type.get("update"), Some(&1));
        assert_eq!(stats.recent_activity, 2);
    }
}
