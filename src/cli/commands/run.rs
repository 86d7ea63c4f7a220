//! The long-running sync agent.
//!
//! Wires the three background loops together: the sync orchestrator, the
//! connection monitor (whose offline-to-online transition triggers an
//! immediate cycle when `sync_on_reconnect` is set), and the health
//! monitor. Runs until Ctrl-C, then shuts the loops down in order.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{SyncConfig, resolve_central_url};
use crate::error::Result;
use crate::model::ConnectionState;
use crate::monitor::{ConnectionMonitor, HealthMonitor};
use crate::store::{CentralStore, HttpCentralStore, SqliteLocalStore};
use crate::sync::{SyncEngine, SyncOrchestrator};

/// Execute the `run` command.
pub async fn execute(db: Option<&PathBuf>, central_url: Option<&str>) -> Result<()> {
    let config = SyncConfig::from_env()?;
    let db_path = super::resolved_path(db)?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let oplog = super::open_oplog(db)?;
    let local = Arc::new(SqliteLocalStore::open(&db_path)?);
    let url = resolve_central_url(central_url)?;
    let central: Arc<dyn CentralStore> =
        Arc::new(HttpCentralStore::new(url.clone(), config.table_op_timeout));

    let engine = Arc::new(SyncEngine::new(
        local,
        central.clone(),
        oplog.clone(),
        config.clone(),
    ));
    let orchestrator = Arc::new(SyncOrchestrator::new(engine, config.clone()));
    let connection = Arc::new(ConnectionMonitor::new(
        central.clone(),
        oplog,
        config.clone(),
    ));
    let health = Arc::new(HealthMonitor::new(central, config.clone()));

    if config.sync_on_reconnect {
        let trigger = orchestrator.trigger_handle();
        connection.on_change(move |old, new| {
            if old == ConnectionState::Offline && new == ConnectionState::Online {
                tracing::info!("central store back online, triggering sync");
                trigger.notify_one();
            }
        });
    }

    connection.start().await;
    health.start().await;
    orchestrator.start().await;
    tracing::info!(
        central = url,
        db = %db_path.display(),
        interval_secs = config.sync_interval.as_secs(),
        policy = %config.policy,
        "clinsync agent started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    orchestrator.stop().await;
    health.stop().await;
    connection.stop().await;
    Ok(())
}
