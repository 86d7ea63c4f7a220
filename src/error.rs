//! Error types for the replication engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, ...)
//! - A transient/permanent split that drives the retry policy:
//!   transient errors leave an operation `pending`, permanent ones mark it
//!   `failed` without consuming the retry budget

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Operator tooling matches on the string; shell scripts
/// on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    NotInitialized,
    StorageError,

    // Not Found (exit 3)
    OperationNotFound,
    ConflictNotFound,
    TableNotRegistered,

    // Validation (exit 4)
    InvalidPolicy,
    InvalidStatus,
    InvalidPayload,
    InvalidArgument,

    // Connectivity (exit 5)
    CentralUnreachable,
    Timeout,

    // Sync (exit 6)
    SyncInProgress,
    ConflictOpen,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::StorageError => "STORAGE_ERROR",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
            Self::ConflictNotFound => "CONFLICT_NOT_FOUND",
            Self::TableNotRegistered => "TABLE_NOT_REGISTERED",
            Self::InvalidPolicy => "INVALID_POLICY",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::CentralUnreachable => "CENTRAL_UNREACHABLE",
            Self::Timeout => "TIMEOUT",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
            Self::ConflictOpen => "CONFLICT_OPEN",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::StorageError => 2,
            Self::OperationNotFound | Self::ConflictNotFound | Self::TableNotRegistered => 3,
            Self::InvalidPolicy
            | Self::InvalidStatus
            | Self::InvalidPayload
            | Self::InvalidArgument => 4,
            Self::CentralUnreachable | Self::Timeout => 5,
            Self::SyncInProgress | Self::ConflictOpen => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in replication operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: no operation log at {path}")]
    NotInitialized { path: PathBuf },

    #[error("Operation not found: {id}")]
    OperationNotFound { id: String },

    #[error("Conflict not found: {id}")]
    ConflictNotFound { id: String },

    #[error("Table not registered for replication: {table}")]
    TableNotRegistered { table: String },

    #[error("Invalid conflict policy: {0} (expected central_wins, edge_wins, newest_wins, or manual)")]
    InvalidPolicy(String),

    #[error("Invalid operation status: {0}")]
    InvalidStatus(String),

    #[error("Invalid payload for table {table}: {message}")]
    InvalidPayload { table: String, message: String },

    #[error("Central store unreachable: {0}")]
    CentralUnreachable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    #[error("Record {record_id} in {table} has an open manual conflict")]
    ConflictOpen { table: String, record_id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized { .. } => ErrorCode::NotInitialized,
            Self::OperationNotFound { .. } => ErrorCode::OperationNotFound,
            Self::ConflictNotFound { .. } => ErrorCode::ConflictNotFound,
            Self::TableNotRegistered { .. } => ErrorCode::TableNotRegistered,
            Self::InvalidPolicy(_) => ErrorCode::InvalidPolicy,
            Self::InvalidStatus(_) => ErrorCode::InvalidStatus,
            Self::InvalidPayload { .. } => ErrorCode::InvalidPayload,
            Self::CentralUnreachable(_) | Self::Http(_) => ErrorCode::CentralUnreachable,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::SyncInProgress => ErrorCode::SyncInProgress,
            Self::ConflictOpen { .. } => ErrorCode::ConflictOpen,
            Self::Database(_) => ErrorCode::StorageError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether the failure is transient and the operation should stay
    /// `pending` for another attempt.
    ///
    /// Transient: timeouts, refused connections, central unreachable.
    /// Everything else (schema violations, malformed payloads, storage
    /// corruption) is permanent; retrying cannot succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::CentralUnreachable(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "transient": self.is_transient(),
                "exit_code": code.exit_code(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout(Duration::from_secs(10)).is_transient());
        assert!(Error::CentralUnreachable("refused".into()).is_transient());
        assert!(!Error::InvalidPayload {
            table: "patients".into(),
            message: "missing id".into()
        }
        .is_transient());
        assert!(!Error::InvalidPolicy("pg_wins".into()).is_transient());
    }

    #[test]
    fn exit_codes_by_category() {
        assert_eq!(Error::SyncInProgress.exit_code(), 6);
        assert_eq!(Error::Config("bad".into()).exit_code(), 7);
        assert_eq!(
            Error::TableNotRegistered { table: "labs".into() }.exit_code(),
            3
        );
    }

    #[test]
    fn structured_json_has_code_and_transient() {
        let err = Error::Timeout(Duration::from_secs(30));
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "TIMEOUT");
        assert_eq!(json["error"]["transient"], true);
    }
}
