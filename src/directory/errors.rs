//! Directory error types
//!
//! On the service side every error here is per-datagram and absorbed by the
//! receive loop, except `Bind` which is fatal at startup. On the client side
//! `Timeout` after all attempts is what callers treat as "directory
//! unreachable".

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Socket could not be bound
    #[error("cannot bind directory socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Configuration rejected at startup
    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),

    /// Socket I/O failure
    #[error("directory I/O error: {0}")]
    Io(#[from] io::Error),

    /// Datagram did not match the wire grammar
    #[error("malformed message: {0}")]
    Malformed(String),

    /// No answer after every attempt
    #[error("directory did not answer after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// Directory answered with an explicit error (e.g. empty registry)
    #[error("no server available: {0}")]
    NoServerAvailable(String),

    /// Directory answered with something other than what was asked for
    #[error("unexpected directory response: {0}")]
    UnexpectedResponse(String),
}

impl DirectoryError {
    /// Transient errors are worth retrying on the next round.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Io(_)
                | DirectoryError::Timeout { .. }
                | DirectoryError::Malformed(_)
                | DirectoryError::UnexpectedResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::Timeout { attempts: 3 }.is_transient());
        assert!(DirectoryError::Malformed("x".into()).is_transient());
        assert!(!DirectoryError::NoServerAvailable("empty".into()).is_transient());
    }

    #[test]
    fn test_timeout_display_mentions_attempts() {
        let err = DirectoryError::Timeout { attempts: 3 };
        assert!(err.to_string().contains("3 attempt"));
    }
}
