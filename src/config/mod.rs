//! Configuration management.
//!
//! The engine reads its configuration from defaults overridden by
//! `CLINSYNC_*` environment variables. The local operation log lives in a
//! single SQLite database resolved through an explicit-path-first chain,
//! the same way the database location is resolved for the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::ConflictPolicy;

/// Warning/critical bounds for one health check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

/// Per-check thresholds for the health battery.
///
/// All values are "above is worse" except `cache_hit_ratio_percent`,
/// where falling below the bound is the problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Probe round-trip, milliseconds.
    pub probe_ms: Thresholds,
    /// Average operation latency, milliseconds.
    pub operation_ms: Thresholds,
    pub memory_percent: Thresholds,
    pub cpu_percent: Thresholds,
    pub disk_percent: Thresholds,
    /// Lower is worse.
    pub cache_hit_ratio_percent: Thresholds,
    /// Lock waits outstanding.
    pub locks_waiting: Thresholds,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            probe_ms: Thresholds { warning: 100.0, critical: 500.0 },
            operation_ms: Thresholds { warning: 500.0, critical: 1000.0 },
            memory_percent: Thresholds { warning: 80.0, critical: 90.0 },
            cpu_percent: Thresholds { warning: 80.0, critical: 95.0 },
            disk_percent: Thresholds { warning: 80.0, critical: 90.0 },
            cache_hit_ratio_percent: Thresholds { warning: 95.0, critical: 90.0 },
            locks_waiting: Thresholds { warning: 5.0, critical: 20.0 },
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Master switch; when false the orchestrator loop never starts.
    pub sync_enabled: bool,
    /// Timer-driven cycle interval.
    pub sync_interval: Duration,
    /// Maximum records pulled per table per cycle.
    pub sync_batch_size: usize,
    pub policy: ConflictPolicy,
    /// Transient-failure retry budget per operation.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Synced operations and history older than this are purged.
    pub retention_days: i64,
    /// Trigger a cycle on the Offline -> Online transition.
    pub sync_on_reconnect: bool,
    /// Run one cycle immediately after start().
    pub sync_on_startup: bool,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Per-table pull/push timeout.
    pub table_op_timeout: Duration,
    pub health_interval: Duration,
    pub health_sample_timeout: Duration,
    /// Connection-status entries kept in the durable history.
    pub connection_history_limit: usize,
    /// Metrics snapshots older than this rolling window are pruned.
    pub metrics_retention_hours: i64,
    pub thresholds: HealthThresholds,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            sync_interval: Duration::from_secs(300),
            sync_batch_size: 1000,
            policy: ConflictPolicy::CentralWins,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            retention_days: 30,
            sync_on_reconnect: true,
            sync_on_startup: true,
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            table_op_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(60),
            health_sample_timeout: Duration::from_secs(10),
            connection_history_limit: 100,
            metrics_retention_hours: 24,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `CLINSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an unparseable value and
    /// `Error::InvalidPolicy` on an unknown policy name. Bad configuration
    /// is rejected at load time, not at first conflict.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_var("CLINSYNC_SYNC_ENABLED") {
            cfg.sync_enabled = parse_bool(&v);
        }
        if let Some(v) = env_var("CLINSYNC_SYNC_INTERVAL_SECONDS") {
            cfg.sync_interval = Duration::from_secs(parse_u64("CLINSYNC_SYNC_INTERVAL_SECONDS", &v)?);
        }
        if let Some(v) = env_var("CLINSYNC_SYNC_BATCH_SIZE") {
            cfg.sync_batch_size = parse_u64("CLINSYNC_SYNC_BATCH_SIZE", &v)? as usize;
        }
        if let Some(v) = env_var("CLINSYNC_CONFLICT_POLICY") {
            cfg.policy = v.parse().map_err(|_: String| Error::InvalidPolicy(v.clone()))?;
        }
        if let Some(v) = env_var("CLINSYNC_RETRY_ATTEMPTS") {
            cfg.retry_attempts = u32::try_from(parse_u64("CLINSYNC_RETRY_ATTEMPTS", &v)?)
                .map_err(|e| Error::Config(format!("CLINSYNC_RETRY_ATTEMPTS: {e}")))?;
        }
        if let Some(v) = env_var("CLINSYNC_RETRY_DELAY_SECONDS") {
            cfg.retry_delay = Duration::from_secs(parse_u64("CLINSYNC_RETRY_DELAY_SECONDS", &v)?);
        }
        if let Some(v) = env_var("CLINSYNC_RETENTION_DAYS") {
            cfg.retention_days = i64::try_from(parse_u64("CLINSYNC_RETENTION_DAYS", &v)?)
                .map_err(|e| Error::Config(format!("CLINSYNC_RETENTION_DAYS: {e}")))?;
        }
        if let Some(v) = env_var("CLINSYNC_SYNC_ON_RECONNECT") {
            cfg.sync_on_reconnect = parse_bool(&v);
        }
        if let Some(v) = env_var("CLINSYNC_SYNC_ON_STARTUP") {
            cfg.sync_on_startup = parse_bool(&v);
        }
        if let Some(v) = env_var("CLINSYNC_PROBE_INTERVAL_SECONDS") {
            cfg.probe_interval = Duration::from_secs(parse_u64("CLINSYNC_PROBE_INTERVAL_SECONDS", &v)?);
        }
        if let Some(v) = env_var("CLINSYNC_HEALTH_INTERVAL_SECONDS") {
            cfg.health_interval = Duration::from_secs(parse_u64("CLINSYNC_HEALTH_INTERVAL_SECONDS", &v)?);
        }

        Ok(cfg)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(v: &str) -> bool {
    !matches!(v.trim().to_lowercase().as_str(), "" | "0" | "false" | "no")
}

fn parse_u64(key: &str, v: &str) -> Result<u64> {
    v.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}

/// Get the global clinsync directory location (`~/.clinsync/`).
#[must_use]
pub fn global_clinsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".clinsync"))
}

/// Check if test mode is enabled (`CLINSYNC_TEST_DB=1`).
///
/// Redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    env_var("CLINSYNC_TEST_DB").is_some_and(|v| parse_bool(&v))
}

/// Resolve the operation-log database path.
///
/// Priority:
/// 1. Explicit path from a CLI flag
/// 2. `CLINSYNC_TEST_DB` -> `~/.clinsync/test/clinsync.db`
/// 3. `CLINSYNC_DB` environment variable
/// 4. Global location: `~/.clinsync/data/clinsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return global_clinsync_dir().map(|d| d.join("test").join("clinsync.db"));
    }

    if let Some(db_path) = env_var("CLINSYNC_DB") {
        return Some(PathBuf::from(db_path));
    }

    global_clinsync_dir().map(|d| d.join("data").join("clinsync.db"))
}

/// Resolve the central-store base URL.
///
/// Priority: explicit flag, then `CLINSYNC_CENTRAL_URL`.
pub fn resolve_central_url(explicit: Option<&str>) -> Result<String> {
    if let Some(url) = explicit {
        return Ok(url.trim_end_matches('/').to_string());
    }
    env_var("CLINSYNC_CENTRAL_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .ok_or_else(|| Error::Config("central store URL not set (CLINSYNC_CENTRAL_URL)".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_profile() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.sync_interval, Duration::from_secs(300));
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.policy, ConflictPolicy::CentralWins);
        assert!(cfg.sync_on_reconnect);
    }

    #[test]
    fn resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        assert_eq!(resolve_db_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn central_url_strips_trailing_slash() {
        let url = resolve_central_url(Some("https://central.example.org/")).unwrap();
        assert_eq!(url, "https://central.example.org");
    }

    #[test]
    fn unknown_policy_string_is_rejected() {
        let err = "eventual_consistency".parse::<ConflictPolicy>().unwrap_err();
        assert!(err.contains("eventual_consistency"));
    }

    #[test]
    fn numeric_overrides_reject_garbage() {
        assert!(parse_u64("CLINSYNC_SYNC_BATCH_SIZE", "1000").is_ok());
        assert!(parse_u64("CLINSYNC_SYNC_BATCH_SIZE", "lots").is_err());
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
