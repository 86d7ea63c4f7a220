//! Command implementations.

pub mod cleanup;
pub mod conflicts;
pub mod operations;
pub mod run;
pub mod status;

use std::path::PathBuf;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::store::OperationLog;

/// Open the operation log, creating the database and its parent
/// directories if needed.
pub(crate) fn open_oplog(db: Option<&PathBuf>) -> Result<OperationLog> {
    let path = resolved_path(db)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OperationLog::open(&path)
}

/// Open the operation log for a read-only command; errors when the
/// database has never been created.
pub(crate) fn open_existing_oplog(db: Option<&PathBuf>) -> Result<OperationLog> {
    let path = resolved_path(db)?;
    if !path.exists() {
        return Err(Error::NotInitialized { path });
    }
    OperationLog::open(&path)
}

pub(crate) fn resolved_path(db: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_db_path(db.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("could not resolve a database path".into()))
}
