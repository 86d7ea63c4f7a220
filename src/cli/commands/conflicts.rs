//! Conflict inspection and manual resolution.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use crate::cli::ConflictCommands;
use crate::config::{SyncConfig, resolve_central_url};
use crate::error::{Error, Result};
use crate::model::Winner;
use crate::store::{CentralStore, HttpCentralStore, SqliteLocalStore};
use crate::sync::SyncEngine;

/// Execute conflict commands.
pub async fn execute(
    command: &ConflictCommands,
    db: Option<&PathBuf>,
    central_url: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        ConflictCommands::List => list(db, json),
        ConflictCommands::Resolve { id, winner, by } => {
            resolve(id, winner, by, db, central_url, json).await
        }
    }
}

fn list(db: Option<&PathBuf>, json: bool) -> Result<()> {
    let oplog = super::open_existing_oplog(db)?;
    let conflicts = oplog.list_conflicts()?;

    if json {
        println!("{}", serde_json::to_string(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("{}", "No open conflicts.".green());
        return Ok(());
    }

    println!("{}", "Open Conflicts".bold().underline());
    println!();
    for c in &conflicts {
        println!(
            "  {} {:16} {} (detected {})",
            c.id.yellow(),
            c.table_name,
            c.record_id,
            c.detected_at.format("%Y-%m-%d %H:%M:%S"),
        );
        println!("      local:  {}", serde_json::to_string(&c.local_version)?);
        println!("      remote: {}", serde_json::to_string(&c.remote_version)?);
    }
    println!();
    println!(
        "{}",
        "Resolve with 'clinsync conflicts resolve <id> --winner local|remote'.".dimmed()
    );
    Ok(())
}

/// Apply an operator-chosen winner to both stores and drop the conflict.
async fn resolve(
    id: &str,
    winner: &str,
    by: &str,
    db: Option<&PathBuf>,
    central_url: Option<&str>,
    json: bool,
) -> Result<()> {
    let winner: Winner = winner.parse().map_err(Error::InvalidArgument)?;
    let config = SyncConfig::from_env()?;
    let db_path = super::resolved_path(db)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized { path: db_path });
    }

    let oplog = super::open_oplog(db)?;
    let local = Arc::new(SqliteLocalStore::open(&db_path)?);
    let url = resolve_central_url(central_url)?;
    let central: Arc<dyn CentralStore> =
        Arc::new(HttpCentralStore::new(url, config.table_op_timeout));
    let engine = SyncEngine::new(local, central, oplog, config);

    engine.resolve_manually(id, winner, by).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "resolved": id, "winner": winner.to_string(), "by": by })
        );
    } else {
        println!("Conflict {id} resolved, winner: {winner}");
    }
    Ok(())
}
