//! Store error types
//!
//! Corruption is the only fatal kind: a node that cannot trust its own
//! store file must stop rather than serve or replicate from it.

use std::io;

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk I/O failure
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Checksum mismatch, bad header or undecodable body
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Command or document could not be (de)serialised
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Write conflicts with existing state (e.g. duplicate user)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write targets an entry owned by someone else
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Write targets something that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write is malformed (empty key, empty username, ...)
    #[error("invalid write: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Check if this error means the store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupted(_) | StoreError::Io { .. })
    }

    /// Short code suitable for a client-facing error line.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "STORE",
            StoreError::Corrupted(_) => "STORE",
            StoreError::Serialization(_) => "STORE",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::PermissionDenied(_) => "PERMISSION_DENIED",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Invalid(_) => "ARGS",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(StoreError::Corrupted("bad crc".into()).is_fatal());
        assert!(StoreError::io("/tmp/x", io::Error::new(io::ErrorKind::Other, "disk")).is_fatal());
    }

    #[test]
    fn test_validation_errors_not_fatal() {
        assert!(!StoreError::Conflict("alice".into()).is_fatal());
        assert!(!StoreError::NotFound("k".into()).is_fatal());
        assert_eq!(StoreError::NotFound("k".into()).code(), "NOT_FOUND");
        assert!(!StoreError::PermissionDenied("k".into()).is_fatal());
        assert_eq!(StoreError::PermissionDenied("k".into()).code(), "PERMISSION_DENIED");
    }
}
