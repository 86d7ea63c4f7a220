//! Conflict resolution.
//!
//! A conflict is the same record changed on both stores since the last
//! common watermark. [`resolve`] is a pure decision function: given both
//! versions and a policy it names a winner, or defers to the manual queue.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Payload, Winner};
use crate::sync::hash::content_hash;

/// How collisions are decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The central store's version always wins.
    #[default]
    CentralWins,
    /// The edge store's version always wins.
    EdgeWins,
    /// The later-updated version wins; ties fall back to central.
    NewestWins,
    /// No automatic winner; the collision waits for an operator.
    Manual,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CentralWins => write!(f, "central_wins"),
            Self::EdgeWins => write!(f, "edge_wins"),
            Self::NewestWins => write!(f, "newest_wins"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "central_wins" => Ok(Self::CentralWins),
            "edge_wins" => Ok(Self::EdgeWins),
            "newest_wins" => Ok(Self::NewestWins),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown conflict policy: {s}")),
        }
    }
}

/// One side of a collision: the payload plus the change timestamp the
/// owning store reported for it.
#[derive(Debug, Clone)]
pub struct ConflictSide {
    pub payload: Payload,
    pub updated_at: DateTime<Utc>,
}

impl ConflictSide {
    #[must_use]
    pub fn new(payload: Payload, updated_at: DateTime<Utc>) -> Self {
        Self { payload, updated_at }
    }

    /// The timestamp used for newest-wins comparison: a record-level
    /// `updated_at` payload field when present, the store-reported change
    /// timestamp otherwise.
    #[must_use]
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.payload
            .get("updated_at")
            .and_then(parse_timestamp)
            .unwrap_or(self.updated_at)
    }
}

/// The outcome of resolving a collision.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner: Winner,
    /// The payload to apply to the losing side.
    pub record: Payload,
}

/// True when both versions carry identical content, a false positive from
/// clock skew or a redundant write. No resolution or conflict record is
/// warranted; the stores already agree.
#[must_use]
pub fn spurious(local: &ConflictSide, remote: &ConflictSide) -> bool {
    content_hash(&local.payload) == content_hash(&remote.payload)
}

/// Pick a winner for a collision under `policy`.
///
/// Returns `None` for [`ConflictPolicy::Manual`]: the caller must park the
/// collision in the pending-conflict set. For a fixed policy and a fixed
/// pair of versions the result is deterministic regardless of call order.
#[must_use]
pub fn resolve(local: &ConflictSide, remote: &ConflictSide, policy: ConflictPolicy) -> Option<Resolution> {
    match policy {
        ConflictPolicy::CentralWins => Some(Resolution {
            winner: Winner::Remote,
            record: remote.payload.clone(),
        }),
        ConflictPolicy::EdgeWins => Some(Resolution {
            winner: Winner::Local,
            record: local.payload.clone(),
        }),
        ConflictPolicy::NewestWins => {
            // Ties break toward central for a deterministic default.
            if local.effective_timestamp() > remote.effective_timestamp() {
                Some(Resolution {
                    winner: Winner::Local,
                    record: local.payload.clone(),
                })
            } else {
                Some(Resolution {
                    winner: Winner::Remote,
                    record: remote.payload.clone(),
                })
            }
        }
        ConflictPolicy::Manual => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}
