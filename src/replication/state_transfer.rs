//! State transfer for joining standbys
//!
//! - Served only by the primary, one requester at a time
//! - The store lock is held for the whole stream, so the bytes are a
//!   consistent cut at one version
//! - The standby validates the bytes before installing them atomically
//! - Replaying updates after the transferred version reaches the primary's
//!   state
//!
//! Any failure on the standby side aborts its startup.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::errors::{ReplicationError, ReplicationResult};
use super::role::ServerRole;
use crate::observability::Event;
use crate::store::{FileStore, SharedStore, StoreDocument, VersionedStore};

/// Stream the persisted store to `stream` and close it.
///
/// Returns the number of bytes sent.
pub async fn serve_snapshot(mut stream: TcpStream, store: &SharedStore) -> ReplicationResult<usize> {
    let guard = store.lock().await;
    let bytes = guard
        .snapshot_bytes()
        .map_err(|e| ReplicationError::state_transfer(e.to_string()))?;

    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    debug!(version = guard.version(), bytes = bytes.len(), "snapshot streamed");
    drop(guard);

    Ok(bytes.len())
}

/// Accept state-transfer connections for the life of the node.
///
/// Connections are served sequentially. While the node is not primary every
/// connection is closed immediately.
pub async fn run_sync_listener(
    listener: TcpListener,
    store: SharedStore,
    role: watch::Receiver<ServerRole>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "sync accept failed");
                continue;
            }
        };

        if !role.borrow().is_primary() {
            debug!(peer = %peer, "closing sync connection, not primary");
            drop(stream);
            continue;
        }

        match serve_snapshot(stream, &store).await {
            Ok(bytes) => info!(event = %Event::SnapshotServed, peer = %peer, bytes, "snapshot served"),
            Err(e) => warn!(peer = %peer, error = %e, "snapshot transfer to standby failed"),
        }
    }
}

/// Fetch the primary's store and install it at `path`.
///
/// `path` is only replaced once the received bytes decode as a valid store
/// file. Returns the installed document.
pub async fn fetch_snapshot(
    primary_sync: SocketAddr,
    path: &Path,
    connect_timeout: Duration,
    transfer_timeout: Duration,
) -> ReplicationResult<StoreDocument> {
    info!(event = %Event::StateTransferBegin, primary = %primary_sync, "requesting state from primary");

    let mut stream = timeout(connect_timeout, TcpStream::connect(primary_sync))
        .await
        .map_err(|_| {
            ReplicationError::state_transfer(format!(
                "connect to {} timed out after {:?}",
                primary_sync, connect_timeout
            ))
        })?
        .map_err(|e| {
            ReplicationError::state_transfer(format!("connect to {} failed: {}", primary_sync, e))
        })?;

    let mut bytes = Vec::new();
    timeout(transfer_timeout, stream.read_to_end(&mut bytes))
        .await
        .map_err(|_| {
            ReplicationError::state_transfer(format!(
                "transfer from {} did not finish within {:?}",
                primary_sync, transfer_timeout
            ))
        })?
        .map_err(|e| ReplicationError::state_transfer(format!("read failed: {}", e)))?;

    if bytes.is_empty() {
        return Err(ReplicationError::state_transfer(format!(
            "{} closed the connection without sending state",
            primary_sync
        )));
    }

    let doc = FileStore::install_snapshot(path, &bytes)
        .map_err(|e| ReplicationError::state_transfer(format!("invalid snapshot: {}", e)))?;

    info!(
        event = %Event::StateTransferComplete,
        version = doc.version,
        bytes = bytes.len(),
        path = %path.display(),
        "state installed"
    );
    Ok(doc)
}
