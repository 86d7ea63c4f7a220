//! Offline-operation listing.

use std::path::PathBuf;

use colored::Colorize;

use crate::error::{Error, Result};
use crate::model::OperationStatus;

/// Execute the `operations` command.
pub fn execute(
    status: Option<&str>,
    limit: usize,
    db: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let oplog = super::open_existing_oplog(db)?;
    let filter = status
        .map(|s| {
            s.parse::<OperationStatus>()
                .map_err(Error::InvalidStatus)
        })
        .transpose()?;

    let mut operations = oplog.list_operations(filter)?;
    operations.truncate(limit);
    let stats = oplog.stats()?;

    if json {
        let output = serde_json::json!({
            "operations": operations,
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("{}", "No matching operations.".dimmed());
        return Ok(());
    }

    println!("{}", "Offline Operations".bold().underline());
    println!();
    for op in &operations {
        let status = match op.status {
            OperationStatus::Synced => op.status.to_string().green(),
            OperationStatus::Failed => op.status.to_string().red(),
            OperationStatus::Conflict => op.status.to_string().yellow(),
            _ => op.status.to_string().normal(),
        };
        let retries = if op.retry_count > 0 {
            format!(" (retries: {})", op.retry_count)
        } else {
            String::new()
        };
        println!(
            "  {} {:10} {:16} {} [{}]{}",
            op.captured_at.format("%Y-%m-%d %H:%M:%S"),
            op.operation_type.to_string(),
            op.table_name,
            op.record_id,
            status,
            retries,
        );
        if let Some(err) = &op.last_error {
            println!("      {}", err.dimmed());
        }
    }
    println!();
    println!(
        "  {} shown, {} captured in the last hour",
        operations.len(),
        stats.recent_activity
    );
    Ok(())
}
