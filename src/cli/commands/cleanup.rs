//! Retention cleanup.

use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::error::Result;

/// Execute the `cleanup` command: purge synced operations past retention
/// and trim the connection history.
pub fn execute(db: Option<&PathBuf>, json: bool) -> Result<()> {
    let oplog = super::open_existing_oplog(db)?;
    let config = SyncConfig::from_env()?;

    let purged = oplog.purge_older_than(config.retention_days)?;
    let trimmed = oplog.prune_connection_history(config.connection_history_limit)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "purged_operations": purged, "trimmed_samples": trimmed })
        );
    } else {
        println!(
            "Purged {purged} synced operations older than {} days.",
            config.retention_days
        );
        println!("Trimmed {trimmed} connection samples.");
    }
    Ok(())
}
