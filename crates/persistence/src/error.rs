//! Error types for SurrealDB persistence.

use std::fmt;

use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// Could not reach or authenticate against the database.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Schema definition was rejected.
    #[error("schema initialization failed: {reason}")]
    SchemaFailed { reason: String },

    /// A query failed.
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// A unique index rejected a write.
    #[error("already exists: {reason}")]
    AlreadyExists { reason: String },

    /// A stored row could not be mapped back to a record.
    #[error("corrupt record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },
}

impl DbError {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a schema failed error.
    pub fn schema_failed(reason: impl Into<String>) -> Self {
        Self::SchemaFailed {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(reason: impl Into<String>) -> Self {
        Self::AlreadyExists {
            reason: reason.into(),
        }
    }

    /// Create a corrupt record error.
    pub fn corrupt_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Convert into a reconciler backend error for `operation`.
    #[must_use]
    pub fn into_backend(self, operation: &str) -> userop_reconciler::Error {
        userop_reconciler::Error::backend(operation, self.to_string())
    }
}

/// Result type for persistence operations.
pub type DbResult<T> = Result<T, DbError>;

/// Categorize a SurrealDB error by its message.
pub fn from_surrealdb_error(err: impl fmt::Display) -> DbError {
    let msg = err.to_string();

    if msg.contains("already contains") || msg.contains("already exists") {
        DbError::already_exists(msg)
    } else if msg.to_lowercase().contains("connection") {
        DbError::connection_failed(msg)
    } else {
        DbError::query_failed(msg)
    }
}
