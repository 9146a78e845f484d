//! Error types for the session store.
//!
//! [`StoreError`] is the primary error type returned by all store operations.
//! Callers distinguish five recoverable-vs-fatal kinds: `NotFound` (caller
//! decides), `Validation` (fix the input, never retried), `Conflict` (safe to
//! retry with backoff), `Integrity` (fatal, writes halt until an operator
//! intervenes), and `Io`/`Migration` (file or parse level failures).

use agora_core::ParseEnumError;
use thiserror::Error;

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("session", "instance", "workspace", "backup").
        entity: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// Input rejected before any storage work. The caller must fix it;
    /// retrying the same request can never succeed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage temporarily busy or locked. Safe to retry with backoff.
    #[error("storage busy: {0}")]
    Conflict(String),

    /// Schema or referential-integrity corruption. Fatal: writes are refused
    /// until an operator restores a backup or explicitly accepts data loss.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Schema migration failed; the store must not serve requests.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// Underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Uncategorized database failure.
    #[error("database error: {0}")]
    Database(String),

    /// The operation was cancelled cooperatively between rows/files.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error (e.g. a panicked storage task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Conflict(err.to_string())
            }
            Some(
                ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::ConstraintViolation,
            ) => Self::Integrity(err.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        // Pool exhaustion/timeout is transient, like a busy database.
        Self::Conflict(format!("connection pool: {err}"))
    }
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::not_found("session", "s-123");
        assert_eq!(err.to_string(), "session not found: s-123");
    }

    #[test]
    fn validation_display() {
        let err = StoreError::Validation("duplicate instance ordinal 2".into());
        assert_eq!(err.to_string(), "validation error: duplicate instance ordinal 2");
    }

    #[test]
    fn conflict_is_retryable() {
        assert!(StoreError::Conflict("locked".into()).is_retryable());
        assert!(!StoreError::Validation("bad".into()).is_retryable());
        assert!(!StoreError::Integrity("fk".into()).is_retryable());
    }

    #[test]
    fn busy_sqlite_error_maps_to_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(matches!(StoreError::from(err), StoreError::Conflict(_)));
    }

    #[test]
    fn constraint_violation_maps_to_integrity() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("FOREIGN KEY constraint failed".into()),
        );
        assert!(matches!(StoreError::from(err), StoreError::Integrity(_)));
    }

    #[test]
    fn plain_sqlite_error_maps_to_database() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn enum_parse_error_maps_to_validation() {
        let parse = "tournament".parse::<agora_core::SessionKind>().unwrap_err();
        let err: StoreError = parse.into();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn migration_display() {
        let err = StoreError::Migration { message: "v002 failed".into() };
        assert_eq!(err.to_string(), "migration error: v002 failed");
    }
}
