//! Replication Error Types
//!
//! - Version gaps and divergence are fatal: the node stops
//! - No automatic repair
//! - Transport and decoding problems are per-message and never fatal

use std::fmt;

use crate::store::StoreError;

/// Replication error type
#[derive(Debug, Clone)]
pub struct ReplicationError {
    /// Error kind
    pub kind: ReplicationErrorKind,
    /// Error message
    pub message: String,
}

/// Replication error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Illegal role transition attempted
    IllegalTransition,

    /// Node has terminated; nothing further is accepted
    Terminated,

    /// Update announced a version more than one ahead of the local store
    VersionGap,

    /// Local history no longer matches the primary's
    Divergence,

    /// A replicated command could not be applied
    ApplyFailed,

    /// Datagram did not match the replication wire format
    MalformedMessage,

    /// Socket-level failure
    Transport,

    /// Joining standby could not obtain the primary's state
    StateTransfer,

    /// Configuration error
    ConfigurationError,
}

impl ReplicationError {
    /// Create a new replication error.
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::IllegalTransition, message)
    }

    /// Create a terminated error.
    pub fn terminated(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Terminated, message)
    }

    /// Create a version gap error.
    pub fn version_gap(local: u64, received: u64) -> Self {
        Self::new(
            ReplicationErrorKind::VersionGap,
            format!(
                "update version {} is more than one ahead of local version {}",
                received, local
            ),
        )
    }

    /// Create a divergence error.
    pub fn divergence(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Divergence, message)
    }

    /// Create an apply failure from the store's error.
    pub fn apply_failed(version: u64, source: &StoreError) -> Self {
        Self::new(
            ReplicationErrorKind::ApplyFailed,
            format!("cannot apply update {}: {}", version, source),
        )
    }

    /// Create a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::MalformedMessage, message)
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Transport, message)
    }

    /// Create a state transfer error.
    pub fn state_transfer(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::StateTransfer, message)
    }

    /// Create a configuration error.
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConfigurationError, message)
    }

    /// Check if this error is fatal (the node must stop).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::Terminated
                | ReplicationErrorKind::VersionGap
                | ReplicationErrorKind::Divergence
                | ReplicationErrorKind::ApplyFailed
                | ReplicationErrorKind::StateTransfer
        )
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicationError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ReplicationError {}

impl From<std::io::Error> for ReplicationError {
    fn from(e: std::io::Error) -> Self {
        Self::transport(e.to_string())
    }
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(ReplicationError::terminated("test").is_fatal());
        assert!(ReplicationError::version_gap(3, 5).is_fatal());
        assert!(ReplicationError::divergence("test").is_fatal());
        assert!(ReplicationError::state_transfer("test").is_fatal());
        assert!(ReplicationError::apply_failed(4, &StoreError::Invalid("x".into())).is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!ReplicationError::malformed("test").is_fatal());
        assert!(!ReplicationError::transport("test").is_fatal());
        assert!(!ReplicationError::illegal_transition("test").is_fatal());
    }

    #[test]
    fn test_gap_message_names_both_versions() {
        let err = ReplicationError::version_gap(3, 5);
        assert!(err.message.contains('3'));
        assert!(err.message.contains('5'));
    }
}
