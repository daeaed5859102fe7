//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Only the two gateway seams can fail; the decision engine never does.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The resource disappeared between the fetch and a status write.
    #[error("resource '{key}' not found")]
    ResourceNotFound { key: String },

    /// A backend call failed for a reason presumed recoverable.
    #[error("backend operation '{operation}' failed: {reason}")]
    Backend { operation: String, reason: String },

    /// A backend call did not answer within the configured timeout.
    #[error("backend operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// A status write raced with another writer.
    #[error("version conflict on '{key}': expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a resource not found error.
    pub fn resource_not_found(key: impl Into<String>) -> Self {
        Self::ResourceNotFound { key: key.into() }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(key: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the scheduler should retry with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::backend("create", "connection refused");
        assert!(err.to_string().contains("create"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_version_conflict_display() {
        let err = Error::version_conflict("default/u1", 3, 4);
        let msg = err.to_string();
        assert!(msg.contains("default/u1"));
        assert!(msg.contains('3'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::backend("get", "io").is_transient());
        assert!(Error::timeout("create", 500).is_transient());
        assert!(!Error::version_conflict("a/b", 1, 2).is_transient());
        assert!(!Error::resource_not_found("a/b").is_transient());
        assert!(!Error::invalid_config("bad").is_transient());
    }
}
