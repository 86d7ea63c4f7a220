//! Cycle scheduling and lifecycle.
//!
//! Owns the timer loop that drives [`SyncEngine::sync_all`] and guards it
//! so at most one cycle runs at a time, however it was triggered: timer,
//! reconnect notification, or an operator's force-sync. After each cycle
//! the retention cleanups run (synced-operation purge, connection-history
//! pruning).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::sync::engine::{CycleStats, SyncEngine};
use crate::sync::status::{SyncStatus, get_sync_status};

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Schedules sync cycles and exposes the operator surface.
pub struct SyncOrchestrator {
    engine: Arc<SyncEngine>,
    config: SyncConfig,
    is_syncing: Arc<AtomicBool>,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, config: SyncConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            config,
            is_syncing: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Notify::new()),
            shutdown,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the background timer loop. Idempotent; a second call while
    /// running is a no-op. Does nothing when sync is disabled.
    pub async fn start(&self) {
        if !self.config.sync_enabled {
            tracing::info!("sync disabled by configuration, timer loop not started");
            return;
        }
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let engine = self.engine.clone();
        let config = self.config.clone();
        let flag = self.is_syncing.clone();
        let trigger = self.trigger.clone();
        let mut shutdown = self.shutdown.subscribe();

        *handle = Some(tokio::spawn(async move {
            if config.sync_on_startup {
                Self::run_and_log(&engine, &flag, &config).await;
            }
            let mut delay = config.sync_interval;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = trigger.notified() => {}
                    () = tokio::time::sleep(delay) => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                delay = if Self::run_and_log(&engine, &flag, &config).await {
                    config.sync_interval
                } else {
                    // Back off to the shorter retry delay after a bad cycle
                    // so an outage ending mid-interval is picked up sooner.
                    config.retry_delay
                };
            }
            tracing::debug!("sync timer loop stopped");
        }));
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sync loop task ended abnormally");
            }
        }
    }

    /// Run one cycle now, outside the timer. Returns `None` when a cycle
    /// is already executing; the request is dropped, not queued.
    pub async fn force_sync(&self) -> Result<Option<CycleStats>> {
        Self::cycle(&self.engine, &self.is_syncing, &self.config).await
    }

    /// Wake the timer loop for an immediate cycle, used by the connection
    /// monitor's offline-to-online transition.
    pub fn trigger_sync(&self) {
        self.trigger.notify_one();
    }

    /// Handle for wiring the reconnect trigger into a monitor callback.
    #[must_use]
    pub fn trigger_handle(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// Operator status snapshot.
    pub fn status(&self) -> Result<SyncStatus> {
        get_sync_status(
            self.engine.oplog(),
            &self.config,
            self.is_syncing.load(Ordering::SeqCst),
        )
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Returns true when the cycle was clean.
    async fn run_and_log(engine: &SyncEngine, flag: &AtomicBool, config: &SyncConfig) -> bool {
        match Self::cycle(engine, flag, config).await {
            Ok(None) => true,
            Ok(Some(stats)) => {
                let clean = stats.is_clean();
                let pushed: usize = stats.tables.iter().map(|t| t.pushed_synced).sum();
                let pulled: usize = stats.tables.iter().map(|t| t.pulled_applied).sum();
                if clean {
                    tracing::info!(pushed, pulled, "sync cycle complete");
                } else {
                    let failures: usize = stats.tables.iter().map(|t| t.failures).sum();
                    tracing::warn!(
                        pushed,
                        pulled,
                        failures,
                        failed_tables = stats.failed_tables,
                        "sync cycle completed with failures"
                    );
                }
                clean
            }
            Err(e) => {
                tracing::warn!(error = %e, "sync cycle failed");
                false
            }
        }
    }

    /// One guarded cycle: all table passes, open-conflict drain, cleanup.
    /// `None` when another cycle already holds the guard.
    async fn cycle(
        engine: &SyncEngine,
        flag: &AtomicBool,
        config: &SyncConfig,
    ) -> Result<Option<CycleStats>> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync trigger ignored, a cycle is already running");
            return Ok(None);
        }
        let _guard = CycleGuard(flag);

        let stats = engine.sync_all().await;

        match engine.process_open_conflicts().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(resolved = n, "drained open conflicts"),
            Err(e) => tracing::warn!(error = %e, "open-conflict drain failed"),
        }
        match engine.oplog().purge_older_than(config.retention_days) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "purged synced operations past retention"),
            Err(e) => tracing::warn!(error = %e, "operation purge failed"),
        }
        if let Err(e) = engine
            .oplog()
            .prune_connection_history(config.connection_history_limit)
        {
            tracing::warn!(error = %e, "connection history pruning failed");
        }

        Ok(Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricsSnapshot, OperationStatus, OperationType, Payload, Source};
    use crate::registry::Table;
    use crate::store::{CentralStore, ChangedRecord, OperationLog, SqliteLocalStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::time::Duration;

    /// Accepts everything; changed-since is always empty. `pause` slows
    /// the pull so two cycles can overlap in tests.
    struct StubCentral {
        pause: Option<Duration>,
    }

    #[async_trait]
    impl CentralStore for StubCentral {
        async fn probe(&self, _timeout: Duration) -> crate::error::Result<Duration> {
            Ok(Duration::from_millis(1))
        }

        async fn changed_since(
            &self,
            _table: Table,
            _since: DateTime<Utc>,
            _limit: usize,
        ) -> crate::error::Result<Vec<ChangedRecord>> {
            if let Some(pause) = self.pause {
                tokio::time::sleep(pause).await;
            }
            Ok(Vec::new())
        }

        async fn apply(
            &self,
            _table: Table,
            _op: OperationType,
            _record_id: &str,
            _payload: &Payload,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn sample_metrics(&self) -> crate::error::Result<MetricsSnapshot> {
            Ok(MetricsSnapshot::zeroed(Utc::now()))
        }
    }

    fn orchestrator(pause: Option<Duration>, config: SyncConfig) -> SyncOrchestrator {
        let local = Arc::new(SqliteLocalStore::open_memory().unwrap());
        let central = Arc::new(StubCentral { pause });
        let oplog = OperationLog::open_memory().unwrap();
        let engine = Arc::new(SyncEngine::new(local, central, oplog, config.clone()));
        SyncOrchestrator::new(engine, config)
    }

    fn one_payload() -> Payload {
        let mut p = Payload::new();
        p.insert("name".into(), json!("Ada"));
        p
    }

    #[tokio::test]
    async fn force_sync_pushes_pending_and_releases_the_guard() {
        let orch = orchestrator(None, SyncConfig::default());
        let op = orch
            .engine()
            .oplog()
            .record(Table::Patients, OperationType::Create, "p-1", one_payload(), Source::Edge)
            .unwrap();

        let stats = orch.force_sync().await.unwrap().unwrap();
        assert!(stats.is_clean());

        let status = orch.status().unwrap();
        assert!(!status.is_syncing);
        assert_eq!(status.pending_count, 0);
        let got = orch.engine().oplog().get_operation(&op.id).unwrap().unwrap();
        assert_eq!(got.status, OperationStatus::Synced);
    }

    #[tokio::test]
    async fn overlapping_force_sync_is_a_dropped_no_op() {
        let orch = Arc::new(orchestrator(Some(Duration::from_millis(50)), SyncConfig::default()));

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.force_sync().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // A trigger under the guard is neither queued nor an error.
        let second = orch.force_sync().await.unwrap();
        assert!(second.is_none());

        assert!(first.await.unwrap().unwrap().is_some());
        // Guard released; a fresh cycle goes through.
        assert!(orch.force_sync().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn startup_cycle_runs_when_configured() {
        let config = SyncConfig {
            sync_on_startup: true,
            sync_interval: Duration::from_secs(3600),
            ..SyncConfig::default()
        };
        let orch = orchestrator(None, config);
        orch.engine()
            .oplog()
            .record(Table::Users, OperationType::Create, "u-1", one_payload(), Source::Edge)
            .unwrap();

        orch.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        orch.stop().await;

        assert_eq!(orch.status().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn trigger_wakes_the_loop_before_the_interval() {
        let config = SyncConfig {
            sync_on_startup: false,
            sync_interval: Duration::from_secs(3600),
            ..SyncConfig::default()
        };
        let orch = orchestrator(None, config);
        orch.engine()
            .oplog()
            .record(Table::Users, OperationType::Create, "u-2", one_payload(), Source::Edge)
            .unwrap();

        orch.start().await;
        orch.trigger_sync();
        tokio::time::sleep(Duration::from_millis(100)).await;
        orch.stop().await;

        assert_eq!(orch.status().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn disabled_sync_never_starts_the_loop() {
        let config = SyncConfig {
            sync_enabled: false,
            sync_on_startup: true,
            ..SyncConfig::default()
        };
        let orch = orchestrator(None, config);
        orch.engine()
            .oplog()
            .record(Table::Users, OperationType::Create, "u-3", one_payload(), Source::Edge)
            .unwrap();

        orch.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.stop().await;

        assert_eq!(orch.status().unwrap().pending_count, 1);
    }
}
