//! End-to-end replication scenarios against an in-memory central store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use clinsync::config::SyncConfig;
use clinsync::error::{Error, Result};
use clinsync::model::{
    MetricsSnapshot, OperationStatus, OperationType, Payload, Source, Winner,
};
use clinsync::registry::Table;
use clinsync::store::{
    CentralStore, ChangedRecord, LocalStore, OperationLog, SqliteLocalStore,
};
use clinsync::sync::{ConflictPolicy, SyncEngine};

/// In-memory stand-in for the central replication API. Keeps the apply
/// order so tests can assert replay ordering, and can be switched
/// unreachable to simulate an outage.
struct FakeCentral {
    records: Mutex<HashMap<(Table, String), ChangedRecord>>,
    applied_order: Mutex<Vec<String>>,
    reachable: AtomicBool,
}

impl FakeCentral {
    fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            applied_order: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    fn set_reachable(&self, up: bool) {
        self.reachable.store(up, Ordering::SeqCst);
    }

    fn seed(&self, table: Table, record_id: &str, payload: Payload) {
        self.seed_at(table, record_id, payload, Utc::now());
    }

    fn seed_at(
        &self,
        table: Table,
        record_id: &str,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) {
        self.records.lock().unwrap().insert(
            (table, record_id.to_string()),
            ChangedRecord {
                record_id: record_id.to_string(),
                payload,
                updated_at,
                deleted: false,
            },
        );
    }

    fn get(&self, table: Table, record_id: &str) -> Option<ChangedRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(table, record_id.to_string()))
            .cloned()
    }

    fn applied_order(&self) -> Vec<String> {
        self.applied_order.lock().unwrap().clone()
    }
}

#[async_trait]
impl CentralStore for FakeCentral {
    async fn probe(&self, _timeout: Duration) -> Result<Duration> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(2))
        } else {
            Err(Error::CentralUnreachable("connection refused".into()))
        }
    }

    async fn changed_since(
        &self,
        table: Table,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::CentralUnreachable("connection refused".into()));
        }
        let mut out: Vec<ChangedRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), rec)| *t == table && rec.updated_at > since)
            .map(|(_, rec)| rec.clone())
            .collect();
        out.sort_by_key(|rec| rec.updated_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn apply(
        &self,
        table: Table,
        op: OperationType,
        record_id: &str,
        payload: &Payload,
    ) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::CentralUnreachable("connection refused".into()));
        }
        self.applied_order.lock().unwrap().push(record_id.to_string());
        self.records.lock().unwrap().insert(
            (table, record_id.to_string()),
            ChangedRecord {
                record_id: record_id.to_string(),
                payload: payload.clone(),
                updated_at: Utc::now(),
                deleted: op == OperationType::Delete,
            },
        );
        Ok(())
    }

    async fn sample_metrics(&self) -> Result<MetricsSnapshot> {
        Ok(MetricsSnapshot::zeroed(Utc::now()))
    }
}

fn payload(fields: &[(&str, serde_json::Value)]) -> Payload {
    fields
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

struct Fixture {
    engine: SyncEngine,
    local: Arc<SqliteLocalStore>,
    central: Arc<FakeCentral>,
    oplog: OperationLog,
}

fn fixture(policy: ConflictPolicy) -> Fixture {
    let local = Arc::new(SqliteLocalStore::open_memory().unwrap());
    let central = Arc::new(FakeCentral::new());
    let oplog = OperationLog::open_memory().unwrap();
    let config = SyncConfig {
        policy,
        ..SyncConfig::default()
    };
    Fixture {
        engine: SyncEngine::new(local.clone(), central.clone(), oplog.clone(), config),
        local,
        central,
        oplog,
    }
}

#[tokio::test]
async fn offline_writes_replay_in_capture_order_on_reconnect() {
    let f = fixture(ConflictPolicy::CentralWins);
    f.central.set_reachable(false);

    // Writes captured during the outage, oldest first.
    for (i, name) in ["Ada", "Grace", "Edsger"].iter().enumerate() {
        f.oplog
            .record(
                Table::Patients,
                OperationType::Create,
                &format!("p-{i}"),
                payload(&[("name", json!(name))]),
                Source::Edge,
            )
            .unwrap();
    }

    // While offline the table pass fails wholesale and nothing syncs.
    assert!(f.engine.sync_table(Table::Patients).await.is_err());
    assert_eq!(f.oplog.list_pending(Some(Table::Patients), 100).unwrap().len(), 3);

    f.central.set_reachable(true);
    let stats = f.engine.sync_table(Table::Patients).await.unwrap();
    assert_eq!(stats.pushed_synced, 3);
    assert_eq!(f.central.applied_order(), vec!["p-0", "p-1", "p-2"]);
    assert!(f.oplog.list_pending(Some(Table::Patients), 100).unwrap().is_empty());
}

#[tokio::test]
async fn both_stores_converge_after_one_pass() {
    let f = fixture(ConflictPolicy::CentralWins);
    // One record only on the edge, one only on central.
    f.oplog
        .record(
            Table::Users,
            OperationType::Create,
            "u-edge",
            payload(&[("email", json!("edge@clinic.test"))]),
            Source::Edge,
        )
        .unwrap();
    f.central.seed(
        Table::Users,
        "u-central",
        payload(&[("email", json!("central@clinic.test"))]),
    );

    f.engine.sync_table(Table::Users).await.unwrap();

    assert!(f.central.get(Table::Users, "u-edge").is_some());
    let pulled = f.local.get(Table::Users, "u-central").await.unwrap();
    assert_eq!(
        pulled.unwrap().payload["email"],
        json!("central@clinic.test")
    );
}

#[tokio::test]
async fn replaying_a_synced_operation_is_idempotent() {
    let f = fixture(ConflictPolicy::CentralWins);
    let p = payload(&[("dose", json!("10mg"))]);

    // The same create applied twice converges to one record.
    f.central
        .apply(Table::Prescriptions, OperationType::Create, "rx-1", &p)
        .await
        .unwrap();
    f.central
        .apply(Table::Prescriptions, OperationType::Create, "rx-1", &p)
        .await
        .unwrap();
    f.local
        .apply(Table::Prescriptions, OperationType::Create, "rx-1", &p)
        .await
        .unwrap();
    f.local
        .apply(Table::Prescriptions, OperationType::Create, "rx-1", &p)
        .await
        .unwrap();

    let rec = f.local.get(Table::Prescriptions, "rx-1").await.unwrap().unwrap();
    assert_eq!(rec.payload["dose"], json!("10mg"));
}

#[tokio::test]
async fn remote_changes_beyond_the_batch_all_arrive() {
    let local = Arc::new(SqliteLocalStore::open_memory().unwrap());
    let central = Arc::new(FakeCentral::new());
    let oplog = OperationLog::open_memory().unwrap();
    let config = SyncConfig {
        sync_batch_size: 2,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(local.clone(), central.clone(), oplog.clone(), config);

    let base = Utc::now() - chrono::Duration::minutes(30);
    for i in 0..3i64 {
        central.seed_at(
            Table::Users,
            &format!("r-{i}"),
            payload(&[("seq", json!(i))]),
            base + chrono::Duration::minutes(i),
        );
    }

    // Repeated passes must deliver every record; a batch-sized window
    // must never strand the records behind it.
    for _ in 0..3 {
        engine.sync_table(Table::Users).await.unwrap();
    }
    for i in 0..3i64 {
        let rec = local.get(Table::Users, &format!("r-{i}")).await.unwrap();
        assert!(rec.is_some(), "r-{i} was never pulled");
    }
}

#[tokio::test]
async fn watermark_only_moves_forward() {
    let f = fixture(ConflictPolicy::CentralWins);
    let epoch = f.oplog.watermark(Table::Appointments).unwrap();

    f.engine.sync_table(Table::Appointments).await.unwrap();
    let first = f.oplog.watermark(Table::Appointments).unwrap();
    assert!(first > epoch);

    f.engine.sync_table(Table::Appointments).await.unwrap();
    let second = f.oplog.watermark(Table::Appointments).unwrap();
    assert!(second >= first);

    // A failing pass leaves the watermark where it was.
    f.central.set_reachable(false);
    assert!(f.engine.sync_table(Table::Appointments).await.is_err());
    assert_eq!(f.oplog.watermark(Table::Appointments).unwrap(), second);
}

#[tokio::test]
async fn exhausted_retries_surface_as_failed_operations() {
    let f = fixture(ConflictPolicy::CentralWins);
    f.oplog
        .record(
            Table::MedicalRecords,
            OperationType::Update,
            "m-1",
            payload(&[("notes", json!("updated"))]),
            Source::Edge,
        )
        .unwrap();

    // The outage outlives the retry budget. The pull fails wholesale
    // while offline, so flip reachability per attempt: pull succeeds,
    // then the push times out against a half-up central.
    struct HalfUpCentral(Arc<FakeCentral>);

    #[async_trait]
    impl CentralStore for HalfUpCentral {
        async fn probe(&self, timeout: Duration) -> Result<Duration> {
            self.0.probe(timeout).await
        }
        async fn changed_since(
            &self,
            table: Table,
            since: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<ChangedRecord>> {
            self.0.reachable.store(true, Ordering::SeqCst);
            let out = self.0.changed_since(table, since, limit).await;
            self.0.reachable.store(false, Ordering::SeqCst);
            out
        }
        async fn apply(
            &self,
            table: Table,
            op: OperationType,
            record_id: &str,
            p: &Payload,
        ) -> Result<()> {
            self.0.apply(table, op, record_id, p).await
        }
        async fn sample_metrics(&self) -> Result<MetricsSnapshot> {
            self.0.sample_metrics().await
        }
    }

    let inner = f.central.clone();
    let config = SyncConfig::default();
    let engine = SyncEngine::new(
        f.local.clone(),
        Arc::new(HalfUpCentral(inner)),
        f.oplog.clone(),
        config.clone(),
    );

    for _ in 0..config.retry_attempts {
        engine.sync_table(Table::MedicalRecords).await.unwrap();
    }

    let failed = f.oplog.list_operations(Some(OperationStatus::Failed)).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, config.retry_attempts);
    assert!(failed[0].last_error.as_deref().unwrap().contains("refused"));
}

#[tokio::test]
async fn manual_conflict_survives_reopen_and_resolves() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("clinsync.db");

    let local = Arc::new(SqliteLocalStore::open_memory().unwrap());
    let central = Arc::new(FakeCentral::new());
    let config = SyncConfig {
        policy: ConflictPolicy::Manual,
        ..SyncConfig::default()
    };

    {
        let oplog = OperationLog::open(&db).unwrap();
        let engine = SyncEngine::new(local.clone(), central.clone(), oplog.clone(), config.clone());

        central.seed(
            Table::Appointments,
            "a-1",
            payload(&[("slot", json!("10:00"))]),
        );
        oplog
            .record(
                Table::Appointments,
                OperationType::Update,
                "a-1",
                payload(&[("slot", json!("11:00"))]),
                Source::Edge,
            )
            .unwrap();
        engine.sync_table(Table::Appointments).await.unwrap();
        assert_eq!(oplog.conflict_count().unwrap(), 1);
    }

    // A restart must not lose the parked conflict.
    let oplog = OperationLog::open(&db).unwrap();
    let engine = SyncEngine::new(local, central.clone(), oplog.clone(), config);
    let conflicts = oplog.list_conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);

    engine
        .resolve_manually(&conflicts[0].id, Winner::Local, "dr-garcia")
        .await
        .unwrap();
    assert_eq!(oplog.conflict_count().unwrap(), 0);
    let rec = central.get(Table::Appointments, "a-1").unwrap();
    assert_eq!(rec.payload["slot"], json!("11:00"));
}
