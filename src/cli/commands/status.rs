//! Status command implementation.

use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::sync::{get_sync_status, print_status};

/// Execute the `status` command.
///
/// Reads the durable state only; `is_syncing` is always false from this
/// side since a concurrently running agent holds the in-memory guard.
pub fn execute(db: Option<&PathBuf>, json: bool) -> Result<()> {
    let oplog = super::open_existing_oplog(db)?;
    let config = SyncConfig::from_env()?;
    let status = get_sync_status(&oplog, &config, false)?;

    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}
