//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// clinsync - offline-first replication agent for clinic edge deployments
#[derive(Parser, Debug)]
#[command(name = "clinsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.clinsync/data/clinsync.db)
    #[arg(long, global = true, env = "CLINSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Central store base URL
    #[arg(long, global = true, env = "CLINSYNC_CENTRAL_URL")]
    pub central_url: Option<String>,

    /// Output as JSON (for tooling integration)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync agent (sync, connection and health loops)
    Run,

    /// Show sync status
    Status,

    /// List captured offline operations
    Operations {
        /// Filter by status (pending, in_progress, synced, failed, conflict)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum operations to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Inspect and resolve replication conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },

    /// Purge synced operations and stale history past retention
    Cleanup,
}

#[derive(Subcommand, Debug)]
pub enum ConflictCommands {
    /// List open conflicts
    List,

    /// Resolve a conflict with an explicit winner
    Resolve {
        /// Conflict ID
        id: String,

        /// Winning side (local, remote)
        #[arg(short, long)]
        winner: String,

        /// Who resolved it, for the audit trail
        #[arg(long, default_value = "operator")]
        by: String,
    },
}
