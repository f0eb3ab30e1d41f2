//! Replication receiver
//!
//! Standby side of the transport. Each message is checked against the local
//! version before anything is applied:
//! - Standby history must stay a prefix of the primary's
//! - Duplicates and stale messages are harmless and ignored
//! - A gap, a missed write or a failed apply is fatal (fail-stop)
//!
//! Nothing here buffers, reorders or asks for a resend.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::config::ReplicationConfig;
use super::errors::{ReplicationError, ReplicationResult};
use super::message::ReplicationMessage;
use super::role::ServerRole;
use crate::observability::Event;
use crate::store::{SharedStore, VersionedStore};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Classification of an incoming message against the local version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveDecision {
    /// Next update in sequence, apply it
    Apply,

    /// Heartbeat at the local version
    InSync,

    /// Already applied, or older than local state
    Stale,

    /// Heartbeat one ahead: an update was lost
    MissedWrite { local: u64, announced: u64 },

    /// More than one ahead
    Gap { local: u64, announced: u64 },
}

impl ReceiveDecision {
    /// Classify `message` for a store at version `local`.
    pub fn classify(local: u64, message: &ReplicationMessage) -> Self {
        let announced = message.version();

        if announced < local {
            return Self::Stale;
        }
        if announced == local {
            return match message {
                ReplicationMessage::Heartbeat { .. } => Self::InSync,
                ReplicationMessage::Update { .. } => Self::Stale,
            };
        }
        if announced == local + 1 {
            return match message {
                ReplicationMessage::Update { .. } => Self::Apply,
                ReplicationMessage::Heartbeat { .. } => Self::MissedWrite { local, announced },
            };
        }
        Self::Gap { local, announced }
    }

    /// Check if this decision stops the node.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissedWrite { .. } | Self::Gap { .. })
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Applied; the store is now at this version
    Applied(u64),
    /// Nothing to do
    Ignored(ReceiveDecision),
}

/// Check `message` against `store` and apply it if it is next in sequence.
///
/// On error the store is left exactly as it was.
pub fn apply_update<S: VersionedStore>(
    store: &mut S,
    message: &ReplicationMessage,
) -> ReplicationResult<ReceiveOutcome> {
    let local = store.version();
    let decision = ReceiveDecision::classify(local, message);

    match (decision, message.command()) {
        (ReceiveDecision::Apply, Some(command)) => {
            let announced = message.version();
            let applied = store
                .apply_write(command)
                .map_err(|e| ReplicationError::apply_failed(announced, &e))?;
            if applied != announced {
                return Err(ReplicationError::divergence(format!(
                    "applied update reached version {}, primary announced {}",
                    applied, announced
                )));
            }
            Ok(ReceiveOutcome::Applied(applied))
        }
        (ReceiveDecision::MissedWrite { local, announced }, _) => {
            Err(ReplicationError::divergence(format!(
                "primary is at version {} but no update for it arrived (local {})",
                announced, local
            )))
        }
        (ReceiveDecision::Gap { local, announced }, _) => {
            Err(ReplicationError::version_gap(local, announced))
        }
        (decision, _) => Ok(ReceiveOutcome::Ignored(decision)),
    }
}

/// Bind the receiving socket for `config.group` on `config.listen_addr()`.
///
/// The address is shared with other sockets so several standbys can run on
/// one host.
pub fn bind_receiver(config: &ReplicationConfig) -> ReplicationResult<UdpSocket> {
    config.validate()?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    socket.bind(&SockAddr::from(config.listen_addr()))?;

    if let SocketAddr::V4(group) = config.group {
        if group.ip().is_multicast() {
            socket.join_multicast_v4(group.ip(), &config.interface)?;
        }
    }
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Consumes replication traffic while the node is standby.
pub struct UpdateReceiver {
    socket: UdpSocket,
    store: SharedStore,
    role: watch::Receiver<ServerRole>,
}

impl UpdateReceiver {
    /// Create a receiver over an already bound socket.
    pub fn new(socket: UdpSocket, store: SharedStore, role: watch::Receiver<ServerRole>) -> Self {
        Self {
            socket,
            store,
            role,
        }
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> ReplicationResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until a fatal condition.
    ///
    /// Only returns on divergence; the caller terminates the node.
    pub async fn run(self) -> ReplicationResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "replication receive failed");
                    continue;
                }
            };

            if !self.role.borrow().accepts_replication() {
                continue;
            }

            let text = String::from_utf8_lossy(&buf[..len]);
            let message = match ReplicationMessage::parse(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!(event = %Event::MalformedDatagram, from = %from, error = %e, "ignoring replication datagram");
                    continue;
                }
            };

            let mut store = self.store.lock().await;
            match apply_update(&mut *store, &message) {
                Ok(ReceiveOutcome::Applied(version)) => {
                    info!(event = %Event::UpdateApplied, version, from = %from, "update applied");
                }
                Ok(ReceiveOutcome::Ignored(decision)) => {
                    debug!(?decision, version = message.version(), local = store.version(), "replication message ignored");
                }
                Err(e) => {
                    error!(
                        event = %Event::ReplicationDiverged,
                        local = store.version(),
                        announced = message.version(),
                        error = %e,
                        "standby diverged from primary"
                    );
                    return Err(e);
                }
            }
        }
    }
}
