//! Client session error types

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::directory::DirectoryError;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Client session errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration rejected
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    /// Directory never answered the lookup
    #[error("directory {directory} unreachable after {attempts} attempt(s)")]
    DirectoryUnreachable { directory: SocketAddr, attempts: u32 },

    /// Directory answered but knows no primary
    #[error("no server available: {0}")]
    NoServerAvailable(String),

    /// The directory kept returning an endpoint that does not work
    #[error("primary {0} unavailable and the directory offers no other")]
    PrimaryUnavailable(String),

    /// TCP connect to the primary failed
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// TCP connect to the primary did not finish in time
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Connection lost while a request was in flight; reconnected, not re-sent
    #[error("request interrupted by a reconnect, it was not re-sent")]
    Interrupted,

    /// Reconnected, but the stored login was refused
    #[error("reconnected but the stored login was refused")]
    ReauthenticationFailed,

    /// Session aborted earlier; nothing more can be sent
    #[error("session closed")]
    Closed,

    /// Request line contains a line break
    #[error("request must be a single line")]
    InvalidRequest,

    /// Other directory failure (e.g. socket bind)
    #[error(transparent)]
    Directory(DirectoryError),

    /// Socket I/O failure
    #[error("client I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Errors after which the session cannot continue.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidConfig(_)
                | ClientError::DirectoryUnreachable { .. }
                | ClientError::PrimaryUnavailable(_)
                | ClientError::Closed
                | ClientError::Directory(_)
        )
    }
}
