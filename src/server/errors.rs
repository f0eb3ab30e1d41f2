//! Server node error types
//!
//! Everything here ends the node. Per-request problems never surface as a
//! `NodeError`; they become `ERROR:<CODE>` lines on the client session.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::replication::ReplicationError;
use crate::store::StoreError;

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Server node errors
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration rejected at startup
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    /// Listener could not be bound
    #[error("cannot bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Directory unreachable or answered unexpectedly during startup
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Fail-stop replication condition or failed state transfer
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// Local store unusable
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Standby was told about a primary that announced no sync port
    #[error("primary {0} announced no sync port, cannot transfer state")]
    NoSyncPort(String),

    /// Directory answered registration with an explicit error
    #[error("directory refused registration: {0}")]
    RegistrationRefused(String),

    /// A background task stopped or panicked
    #[error("node task ended: {0}")]
    TaskEnded(String),
}

impl NodeError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::InvalidConfig(_) => 2,
            _ => 1,
        }
    }
}
