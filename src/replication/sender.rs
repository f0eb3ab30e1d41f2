//! Replication sender
//!
//! Primary side of the transport:
//! - Every committed write is broadcast once, in commit order
//! - No acknowledgement, no retry, no resend
//! - A periodic heartbeat carries the current version so idle standbys can
//!   still notice a missed write
//!
//! Ordering on the wire follows version order because the broadcast happens
//! while the store lock taken for the commit is still held.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::ReplicationConfig;
use super::errors::ReplicationResult;
use super::message::ReplicationMessage;
use super::role::ServerRole;
use crate::observability::Event;
use crate::store::{SharedStore, StoreResult, VersionedStore, WriteCommand};

/// Sends replication traffic to the group.
#[derive(Debug)]
pub struct ReplicationSender {
    socket: UdpSocket,
    target: SocketAddr,
    client_port: u16,
    sync_port: u16,
}

impl ReplicationSender {
    /// Bind an ephemeral sending socket configured for `config.group`.
    ///
    /// `client_port` and `sync_port` are stamped on every message.
    pub fn bind(config: &ReplicationConfig, client_port: u16, sync_port: u16) -> ReplicationResult<Self> {
        config.validate()?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        if config.is_multicast() {
            socket.set_multicast_ttl_v4(config.ttl)?;
            socket.set_multicast_loop_v4(true)?;
            if !config.interface.is_unspecified() {
                socket.set_multicast_if_v4(&config.interface)?;
            }
        }
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket.bind(&SockAddr::from(local))?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: UdpSocket::from_std(socket.into())?,
            target: config.group,
            client_port,
            sync_port,
        })
    }

    /// Where messages go.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one message.
    pub async fn send(&self, message: &ReplicationMessage) -> ReplicationResult<()> {
        let payload = message.encode()?;
        self.socket.send_to(payload.as_bytes(), self.target).await?;
        Ok(())
    }

    /// Broadcast a committed write.
    pub async fn send_update(&self, version: u64, command: &WriteCommand) -> ReplicationResult<()> {
        self.send(&ReplicationMessage::Update {
            version,
            client_port: self.client_port,
            sync_port: self.sync_port,
            command: command.clone(),
        })
        .await
    }

    /// Broadcast the current version.
    pub async fn send_heartbeat(&self, version: u64) -> ReplicationResult<()> {
        self.send(&ReplicationMessage::Heartbeat {
            version,
            client_port: self.client_port,
            sync_port: self.sync_port,
        })
        .await
    }
}

/// Commit a write on the primary and replicate it.
///
/// Applies `command` to the store, bumping the version, then broadcasts the
/// update before the store lock is released. A failed broadcast is logged
/// and does not fail the write: the standbys will detect the gap.
pub async fn commit(
    store: &SharedStore,
    sender: &ReplicationSender,
    command: &WriteCommand,
) -> StoreResult<u64> {
    let mut guard = store.lock().await;
    let version = guard.apply_write(command)?;
    info!(event = %Event::WriteCommit, version, op = command.kind(), "write committed");

    match sender.send_update(version, command).await {
        Ok(()) => debug!(event = %Event::UpdateBroadcast, version, target = %sender.target(), "update sent"),
        Err(e) => warn!(version, error = %e, "update broadcast failed"),
    }

    drop(guard);
    Ok(version)
}

/// Send a heartbeat every `every` while the node is primary.
///
/// Ends when the role channel closes.
pub async fn run_heartbeats(
    sender: Arc<ReplicationSender>,
    store: SharedStore,
    mut role: watch::Receiver<ServerRole>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = role.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        }

        if !role.borrow().is_primary() {
            continue;
        }

        let version = store.lock().await.version();
        if let Err(e) = sender.send_heartbeat(version).await {
            warn!(version, error = %e, "replication heartbeat failed");
        }
    }
}
