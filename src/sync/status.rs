//! Sync status display.
//!
//! Assembles the operator-facing view of the replication engine: queue
//! depths by status, open conflicts, the last clean sync, and the active
//! policy.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::{ConnectionSample, OperationStatus};
use crate::store::OperationLog;
use crate::sync::conflict::ConflictPolicy;

/// Snapshot of the engine's durable state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub sync_enabled: bool,
    /// True while a cycle is executing right now.
    pub is_syncing: bool,
    pub policy: ConflictPolicy,
    pub pending_count: usize,
    pub in_progress_count: usize,
    pub failed_count: usize,
    pub conflict_count: usize,
    pub synced_count: usize,
    /// Operations captured in the last hour.
    pub recent_activity: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Most recent connection probe, if any has been recorded.
    pub connection: Option<ConnectionSample>,
}

/// Get the current sync status from the durable operation log.
///
/// # Errors
///
/// Returns an error if the log queries fail.
pub fn get_sync_status(
    oplog: &OperationLog,
    config: &SyncConfig,
    is_syncing: bool,
) -> Result<SyncStatus> {
    let stats = oplog.stats()?;
    let connection = oplog.connection_history(1)?.into_iter().next();

    Ok(SyncStatus {
        sync_enabled: config.sync_enabled,
        is_syncing,
        policy: config.policy,
        pending_count: stats.count(OperationStatus::Pending),
        in_progress_count: stats.count(OperationStatus::InProgress),
        failed_count: stats.count(OperationStatus::Failed),
        conflict_count: oplog.conflict_count()?,
        synced_count: stats.count(OperationStatus::Synced),
        recent_activity: stats.recent_activity,
        last_sync_at: oplog.last_sync_at()?,
        connection,
    })
}

/// Print sync status to stdout in a human-readable format.
pub fn print_status(status: &SyncStatus) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    if let Some(sample) = &status.connection {
        let state = match sample.state {
            crate::model::ConnectionState::Online => sample.state.to_string().green(),
            crate::model::ConnectionState::Offline => sample.state.to_string().red(),
            _ => sample.state.to_string().yellow(),
        };
        println!("  Connection:  {state}");
    } else {
        println!("  Connection:  {}", "no probes recorded".dimmed());
    }
    println!("  Policy:      {}", status.policy);
    println!(
        "  Syncing:     {}",
        if status.is_syncing { "yes" } else { "no" }
    );
    match status.last_sync_at {
        Some(at) => println!("  Last sync:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync:   {}", "never".dimmed()),
    }
    println!();

    println!("{}", "Operation Queue:".blue().bold());
    println!("  Pending:     {}", status.pending_count);
    if status.in_progress_count > 0 {
        println!("  In progress: {}", status.in_progress_count);
    }
    println!("  Synced:      {}", status.synced_count);
    if status.failed_count > 0 {
        println!(
            "  Failed:      {}",
            status.failed_count.to_string().red().bold()
        );
    }
    if status.conflict_count > 0 {
        println!(
            "  Conflicts:   {}",
            status.conflict_count.to_string().yellow().bold()
        );
        println!();
        println!(
            "{}",
            "Run 'clinsync conflicts' to inspect open conflicts.".dimmed()
        );
    }
    if status.recent_activity > 0 {
        println!("  Last hour:   {}", status.recent_activity);
    }
    if !status.sync_enabled {
        println!();
        println!("{}", "Sync is disabled by configuration.".yellow());
    }
}
