//! Core data types for the replication engine.
//!
//! These mirror the durable shapes in the operation log: captured write
//! operations, connection samples, detected conflicts, health check results,
//! and sampled metrics. Timestamps are `DateTime<Utc>` in memory and INTEGER
//! Unix milliseconds at rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured field map representing a record's column values.
pub type Payload = Map<String, Value>;

// ── Operations ────────────────────────────────────────────────

/// The kind of write captured against a replicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Unknown operation type: {s}")),
        }
    }
}

/// Which store originated a captured write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Edge,
    Central,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edge => write!(f, "edge"),
            Self::Central => write!(f, "central"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edge" => Ok(Self::Edge),
            "central" => Ok(Self::Central),
            _ => Err(format!("Unknown source: {s}")),
        }
    }
}

/// Lifecycle state of a captured operation.
///
/// `Synced` is terminal-immutable; `Failed` is terminal and requires
/// operator intervention; `Conflict` suspends the record until resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Synced,
    Failed,
    Conflict,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Synced => write!(f, "synced"),
            Self::Failed => write!(f, "failed"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            _ => Err(format!("Unknown operation status: {s}")),
        }
    }
}

/// A captured write intent, durably logged before the underlying
/// transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Log id (UUID v4).
    pub id: String,
    /// Replicated table this write targets.
    pub table_name: String,
    pub operation_type: OperationType,
    /// Table-specific primary key, kept opaque.
    pub record_id: String,
    /// Column values at capture time.
    pub payload: Payload,
    pub source: Source,
    pub captured_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

// ── Connection ────────────────────────────────────────────────

/// Point-in-time reachability of the central store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Offline,
    Connecting,
    Unknown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Connecting => write!(f, "connecting"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "connecting" => Ok(Self::Connecting),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown connection state: {s}")),
        }
    }
}

/// One entry in the append-only connection history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSample {
    pub state: ConnectionState,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

// ── Conflicts ─────────────────────────────────────────────────

/// Which side of a collision won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for Winner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(format!("Unknown winner: {s} (expected local or remote)")),
        }
    }
}

/// A detected collision: the same record changed on both stores since the
/// last common watermark. Removed from the pending set once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict id (UUID v4).
    pub id: String,
    pub table_name: String,
    pub record_id: String,
    pub local_version: Payload,
    pub remote_version: Payload,
    /// When the local side last changed the record.
    pub local_updated_at: DateTime<Utc>,
    /// When the remote side last changed the record.
    pub remote_updated_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    /// `None` until resolved.
    pub resolution: Option<Winner>,
    /// Policy name, or "manual" for operator resolutions.
    pub resolved_by: Option<String>,
}

// ── Health ────────────────────────────────────────────────────

/// Health status level, ordered worst-first for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl HealthStatus {
    /// Severity rank used by the worst-status aggregation rule:
    /// critical > warning > healthy > unknown.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::Warning => 2,
            Self::Healthy => 1,
            Self::Unknown => 0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one threshold check in the health battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub measured_at: DateTime<Utc>,
    pub details: Map<String, Value>,
}

/// A sampled set of numeric gauges from the central store, retained for a
/// rolling window and pruned afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connection_count: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    /// Average operation latency, milliseconds.
    pub avg_operation_ms: f64,
    pub slow_operations: u32,
    /// Cache/read-efficiency ratio, percent.
    pub cache_hit_ratio: f64,
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub locks_waiting: u32,
    pub deadlocks: u32,
}

impl MetricsSnapshot {
    /// An all-zero snapshot at the given instant, used when the sampler
    /// cannot reach the central store.
    #[must_use]
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            connection_count: 0,
            active_connections: 0,
            idle_connections: 0,
            avg_operation_ms: 0.0,
            slow_operations: 0,
            cache_hit_ratio: 0.0,
            memory_usage_percent: 0.0,
            cpu_usage_percent: 0.0,
            disk_usage_percent: 0.0,
            locks_waiting: 0,
            deadlocks: 0,
        }
    }
}

// ── Watermarks ────────────────────────────────────────────────

/// Per-table high-water mark of the last clean sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub table_name: String,
    pub last_synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn operation_status_round_trip() {
        for s in ["pending", "in_progress", "synced", "failed", "conflict"] {
            let parsed = OperationStatus::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!(OperationStatus::from_str("done").is_err());
    }

    #[test]
    fn health_severity_ordering() {
        assert!(HealthStatus::Critical.severity() > HealthStatus::Warning.severity());
        assert!(HealthStatus::Warning.severity() > HealthStatus::Healthy.severity());
        assert!(HealthStatus::Healthy.severity() > HealthStatus::Unknown.severity());
    }

    #[test]
    fn winner_parse() {
        assert_eq!(Winner::from_str("local").unwrap(), Winner::Local);
        assert_eq!(Winner::from_str("remote").unwrap(), Winner::Remote);
        assert!(Winner::from_str("central").is_err());
    }
}
