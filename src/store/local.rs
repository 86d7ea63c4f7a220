//! Edge record store on SQLite.
//!
//! Holds the replicated clinic tables' rows as JSON payloads keyed by
//! (table, record id), with an update timestamp and a tombstone flag so
//! deletions replicate. Deployed next to the application; always available.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::model::{OperationType, Payload};
use crate::registry::Table;
use crate::store::{ChangedRecord, LocalStore};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS edge_records (
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (table_name, record_id)
);

CREATE INDEX IF NOT EXISTS idx_edge_records_updated ON edge_records(table_name, updated_at);
";

/// SQLite-backed [`LocalStore`].
#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocalStore {
    /// Open (creating if needed) the edge store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open an in-memory edge store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("edge store mutex poisoned".into()))
    }

    /// Upsert a row with an explicit update timestamp. Used by the
    /// application's write path and by tests constructing histories.
    pub fn put(
        &self,
        table: Table,
        record_id: &str,
        payload: &Payload,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO edge_records (table_name, record_id, payload, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(table_name, record_id) DO UPDATE
             SET payload = excluded.payload, updated_at = excluded.updated_at, deleted = 0",
            params![
                table.name(),
                record_id,
                serde_json::to_string(payload)?,
                updated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn changed_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_id, payload, updated_at, deleted FROM edge_records
             WHERE table_name = ?1 AND updated_at > ?2
             ORDER BY updated_at ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![table.name(), since.timestamp_millis(), limit as i64],
            row_to_record,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn get(&self, table: Table, record_id: &str) -> Result<Option<ChangedRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT record_id, payload, updated_at, deleted FROM edge_records
             WHERE table_name = ?1 AND record_id = ?2",
            params![table.name(), record_id],
            row_to_record,
        )
        .optional()
        .map_err(Error::from)
    }

    async fn apply(
        &self,
        table: Table,
        op: OperationType,
        record_id: &str,
        payload: &Payload,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;
        match op {
            OperationType::Create | OperationType::Update => {
                conn.execute(
                    "INSERT INTO edge_records (table_name, record_id, payload, updated_at, deleted)
                     VALUES (?1, ?2, ?3, ?4, 0)
                     ON CONFLICT(table_name, record_id) DO UPDATE
                     SET payload = excluded.payload, updated_at = excluded.updated_at, deleted = 0",
                    params![table.name(), record_id, serde_json::to_string(payload)?, now],
                )?;
            }
            OperationType::Delete => {
                // Tombstone rather than hard delete so the deletion itself
                // replicates through changed-since queries.
                conn.execute(
                    "INSERT INTO edge_records (table_name, record_id, payload, updated_at, deleted)
                     VALUES (?1, ?2, '{}', ?3, 1)
                     ON CONFLICT(table_name, record_id) DO UPDATE
                     SET deleted = 1, updated_at = excluded.updated_at",
                    params![table.name(), record_id, now],
                )?;
            }
        }
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangedRecord> {
    let payload: String = row.get(1)?;
    let millis: i64 = row.get(2)?;
    Ok(ChangedRecord {
        record_id: row.get(0)?,
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        updated_at: Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now),
        deleted: row.get::<_, i64>(3)? != 0,
    })
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

    #[tokio::test]
    async fn apply_create_then_get() {
        let store = SqliteLocalStore::open_memory().unwrap();
        let p = payload(&[("id", json!("p1")), ("name", json!("Ada"))]);
        store
            .apply(Table::Patients, OperationType::Create, "p1", &p)
            .await
            .unwrap();

        let rec = store.get(Table::Patients, "p1").await.unwrap().unwrap();
        assert_eq!(rec.payload["name"], json!("Ada"));
        assert!(!rec.deleted);
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = SqliteLocalStore::open_memory().unwrap();
        let p = payload(&[("id", json!("p1")), ("name", json!("Ada"))]);

        for _ in 0..2 {
            store
                .apply(Table::Patients, OperationType::Update, "p1", &p)
                .await
                .unwrap();
        }
        let rec = store.get(Table::Patients, "p1").await.unwrap().unwrap();
        assert_eq!(rec.payload["name"], json!("Ada"));

        for _ in 0..2 {
            store
                .apply(Table::Patients, OperationType::Delete, "p1", &Payload::new())
                .await
                .unwrap();
        }
        let rec = store.get(Table::Patients, "p1").await.unwrap().unwrap();
        assert!(rec.deleted);
    }

    #[tokio::test]
    async fn changed_since_filters_by_timestamp() {
        let store = SqliteLocalStore::open_memory().unwrap();
        let old = Utc::now() - chrono::Duration::hours(2);
        let cutoff = Utc::now() - chrono::Duration::hours(1);

        store
            .put(Table::Users, "u1", &payload(&[("id", json!("u1"))]), old)
            .unwrap();
        store
            .put(Table::Users, "u2", &payload(&[("id", json!("u2"))]), Utc::now())
            .unwrap();

        let changed = store.changed_since(Table::Users, cutoff, 100).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].record_id, "u2");
    }
}
