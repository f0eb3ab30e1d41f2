//! Server node lifecycle
//!
//! Startup:
//! 1. Bind the client gateway and the state-transfer listener
//! 2. Register with the directory, then learn the role from one heartbeat
//! 3. A standby copies the primary's store before serving anything
//! 4. Open the store and start the background tasks
//!
//! After startup the directory is the only source of role changes. A lost
//! acknowledgement leaves the role alone; the next round re-registers first.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::application::Application;
use super::config::NodeConfig;
use super::errors::{NodeError, NodeResult};
use super::gateway::run_gateway;
use crate::directory::{DirectoryClient, DirectoryError, HeartbeatInfo, NodeRole};
use crate::observability::Event;
use crate::replication::{
    bind_receiver, fetch_snapshot, run_heartbeats, run_sync_listener, ReplicationError,
    ReplicationErrorKind, ReplicationSender, ServerRole, TerminationReason, UpdateReceiver,
};
use crate::store::{decode, shared, FileStore, SharedStore, StoreError, VersionedStore};

/// A server node with its listeners bound, not yet registered.
pub struct ServerNode {
    config: NodeConfig,
    client_listener: TcpListener,
    sync_listener: TcpListener,
    role_tx: watch::Sender<ServerRole>,
}

impl ServerNode {
    /// Validate `config` and bind both TCP listeners.
    pub async fn bind(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;

        let client_listener = bind_listener("client gateway", config.client_bind).await?;
        let sync_listener = bind_listener("sync listener", config.sync_bind).await?;
        let (role_tx, _) = watch::channel(ServerRole::Joining);

        Ok(Self {
            config,
            client_listener,
            sync_listener,
            role_tx,
        })
    }

    /// Bound client gateway address.
    pub fn client_addr(&self) -> NodeResult<SocketAddr> {
        local_addr("client gateway", &self.client_listener)
    }

    /// Bound state-transfer address.
    pub fn sync_addr(&self) -> NodeResult<SocketAddr> {
        local_addr("sync listener", &self.sync_listener)
    }

    /// Watch the node's role.
    pub fn subscribe_role(&self) -> watch::Receiver<ServerRole> {
        self.role_tx.subscribe()
    }

    /// Run until Ctrl-C or a fatal condition.
    pub async fn run(self) -> NodeResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or a fatal condition.
    ///
    /// Returns `Ok` only for a requested shutdown.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> NodeResult<()> {
        let ServerNode {
            config,
            client_listener,
            sync_listener,
            role_tx,
        } = self;
        let client_port = local_addr("client gateway", &client_listener)?.port();
        let sync_port = local_addr("sync listener", &sync_listener)?.port();

        info!(
            event = %Event::BootStart,
            directory = %config.directory,
            client_port,
            sync_port,
            store = %config.store_path.display(),
            "server node starting"
        );

        let directory = DirectoryClient::connect(config.directory).await?;
        let primary = match directory
            .register(client_port, Some(sync_port), config.ack_timeout, config.register_attempts)
            .await
        {
            Ok(primary) => primary,
            Err(DirectoryError::NoServerAvailable(reason)) => {
                return Err(NodeError::RegistrationRefused(reason))
            }
            Err(e) => return Err(e.into()),
        };
        info!(event = %Event::NodeRegistered, primary = %primary, "registered with directory");

        let info = HeartbeatInfo {
            version: peek_version(&config.store_path),
            client_port,
            sync_port,
        };
        let assigned = first_heartbeat(&directory, info, &config).await?;

        // Bound before the transfer so updates committed meanwhile are queued
        // by the kernel; the version check drops the ones already copied.
        let replication_socket = bind_receiver(&config.replication)?;

        if assigned == NodeRole::Standby {
            let primary_sync = primary
                .sync_addr()
                .ok_or_else(|| NodeError::NoSyncPort(primary.to_string()))?;
            if let Err(e) = fetch_snapshot(
                primary_sync,
                &config.store_path,
                config.connect_timeout,
                config.transfer_timeout,
            )
            .await
            {
                error!(event = %Event::StateTransferFailed, primary = %primary_sync, error = %e, "state transfer failed");
                role_tx.send_replace(ServerRole::Joining.terminate(TerminationReason::StateTransferFailed));
                return Err(e.into());
            }
        }

        let store = match FileStore::open(&config.store_path) {
            Ok(store) => shared(store),
            Err(e) => {
                if matches!(e, StoreError::Corrupted(_)) {
                    role_tx.send_replace(ServerRole::Joining.terminate(TerminationReason::StoreCorrupted));
                }
                return Err(e.into());
            }
        };

        let initial = ServerRole::Joining.follow(assigned)?;
        role_tx.send_replace(initial);
        let version = store.lock().await.version();
        info!(
            event = %Event::RoleChanged,
            from = ServerRole::Joining.state_name(),
            to = initial.state_name(),
            version,
            "role assigned"
        );

        let sender = Arc::new(ReplicationSender::bind(&config.replication, client_port, sync_port)?);
        let receiver = UpdateReceiver::new(
            replication_socket,
            Arc::clone(&store),
            role_tx.subscribe(),
        );
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let app = Arc::new(Application::new(Arc::clone(&store), Arc::clone(&sender), fatal_tx));
        let role_tx = Arc::new(role_tx);

        // Dropping the set aborts every task, whichever way this returns.
        let mut tasks: JoinSet<NodeResult<()>> = JoinSet::new();
        tasks.spawn({
            let role = role_tx.subscribe();
            let pre_auth = config.pre_auth_timeout;
            async move {
                run_gateway(client_listener, app, role, pre_auth).await;
                Ok(())
            }
        });
        tasks.spawn({
            let store = Arc::clone(&store);
            let role = role_tx.subscribe();
            async move {
                run_sync_listener(sync_listener, store, role).await;
                Ok(())
            }
        });
        tasks.spawn({
            let store = Arc::clone(&store);
            let role = role_tx.subscribe();
            let every = config.replication.heartbeat_interval;
            async move {
                run_heartbeats(sender, store, role, every).await;
                Ok(())
            }
        });
        tasks.spawn(async move { receiver.run().await.map_err(NodeError::from) });
        tasks.spawn(directory_heartbeats(
            directory,
            Arc::clone(&store),
            Arc::clone(&role_tx),
            client_port,
            sync_port,
            config.heartbeat_interval,
            config.ack_timeout,
        ));

        info!(
            event = %Event::Serving,
            role = initial.state_name(),
            client_port,
            sync_port,
            "server node ready"
        );

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            _ = &mut shutdown => Ok(()),
            Some(e) = fatal_rx.recv() => Err(NodeError::Store(e)),
            Some(joined) = tasks.join_next() => match joined {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(NodeError::TaskEnded("background task returned".into())),
                Err(e) => Err(NodeError::TaskEnded(e.to_string())),
            },
        };

        match outcome {
            Ok(()) => {
                info!(event = %Event::ShutdownStart, "server node shutting down");
                tasks.shutdown().await;
                store.lock().await.flush()?;
                info!(event = %Event::ShutdownComplete, "server node stopped");
                Ok(())
            }
            Err(e) => {
                let reason = termination_reason(&e);
                let previous = *role_tx.borrow();
                let terminated = previous.terminate(reason);
                role_tx.send_replace(terminated);
                error!(
                    event = %Event::RoleChanged,
                    from = previous.state_name(),
                    to = terminated.state_name(),
                    reason = reason.as_str(),
                    error = %e,
                    "server node terminated"
                );
                Err(e)
            }
        }
    }
}

async fn bind_listener(what: &'static str, addr: SocketAddr) -> NodeResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { what, addr, source })
}

fn local_addr(what: &'static str, listener: &TcpListener) -> NodeResult<SocketAddr> {
    listener.local_addr().map_err(|source| NodeError::Bind {
        what,
        addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        source,
    })
}

/// Version of an existing local store, 0 if there is none or it is unreadable.
///
/// Only reported to the directory, which does not act on it.
fn peek_version(path: &Path) -> u64 {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| decode(&bytes).ok())
        .map(|doc| doc.version)
        .unwrap_or(0)
}

async fn first_heartbeat(
    directory: &DirectoryClient,
    info: HeartbeatInfo,
    config: &NodeConfig,
) -> NodeResult<NodeRole> {
    let mut last = None;
    for _ in 0..config.register_attempts {
        match directory.heartbeat(info, config.ack_timeout).await {
            Ok(role) => return Ok(role),
            Err(e) => {
                warn!(event = %Event::HeartbeatLost, error = %e, "no answer to first heartbeat");
                last = Some(e);
            }
        }
    }
    Err(last
        .unwrap_or(DirectoryError::Timeout {
            attempts: config.register_attempts,
        })
        .into())
}

/// Heartbeat the directory every `every` and follow the role it assigns.
///
/// Only returns on an impossible transition, i.e. after termination.
async fn directory_heartbeats(
    directory: DirectoryClient,
    store: SharedStore,
    role_tx: Arc<watch::Sender<ServerRole>>,
    client_port: u16,
    sync_port: u16,
    every: Duration,
    ack_timeout: Duration,
) -> NodeResult<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already heartbeated.
    ticker.tick().await;

    let mut reregister = false;
    loop {
        ticker.tick().await;

        if reregister {
            match directory
                .register(client_port, Some(sync_port), ack_timeout, 1)
                .await
            {
                Ok(primary) => {
                    info!(event = %Event::NodeRegistered, primary = %primary, "re-registered with directory");
                    reregister = false;
                }
                Err(e) => {
                    warn!(event = %Event::HeartbeatLost, error = %e, "re-registration failed");
                    continue;
                }
            }
        }

        let info = HeartbeatInfo {
            version: store.lock().await.version(),
            client_port,
            sync_port,
        };
        match directory.heartbeat(info, ack_timeout).await {
            Ok(assigned) => {
                let current = *role_tx.borrow();
                let next = current.follow(assigned)?;
                if next != current {
                    info!(
                        event = %Event::RoleChanged,
                        from = current.state_name(),
                        to = next.state_name(),
                        version = info.version,
                        "directory changed role"
                    );
                    role_tx.send_replace(next);
                }
            }
            Err(e) => {
                warn!(
                    event = %Event::HeartbeatLost,
                    role = role_tx.borrow().state_name(),
                    error = %e,
                    "heartbeat not acknowledged, keeping role"
                );
                reregister = true;
            }
        }
    }
}

fn termination_reason(err: &NodeError) -> TerminationReason {
    match err {
        NodeError::Replication(ReplicationError { kind, .. }) => match kind {
            ReplicationErrorKind::VersionGap => TerminationReason::VersionGap,
            ReplicationErrorKind::ApplyFailed => TerminationReason::ApplyFailed,
            ReplicationErrorKind::StateTransfer => TerminationReason::StateTransferFailed,
            _ => TerminationReason::Divergence,
        },
        NodeError::Store(_) => TerminationReason::StoreCorrupted,
        _ => TerminationReason::Divergence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{encode, StoreDocument};
    use tempfile::TempDir;

    #[test]
    fn test_peek_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.db");
        assert_eq!(peek_version(&path), 0);

        let doc = StoreDocument {
            version: 7,
            ..StoreDocument::default()
        };
        std::fs::write(&path, encode(&doc).unwrap()).unwrap();
        assert_eq!(peek_version(&path), 7);

        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(peek_version(&path), 0);
    }

    #[test]
    fn test_termination_reason() {
        let gap: NodeError = ReplicationError::version_gap(3, 5).into();
        assert_eq!(termination_reason(&gap), TerminationReason::VersionGap);

        let corrupt: NodeError = StoreError::Corrupted("crc".into()).into();
        assert_eq!(termination_reason(&corrupt), TerminationReason::StoreCorrupted);
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_ports() {
        let dir = TempDir::new().unwrap();
        let config = NodeConfig {
            client_bind: "127.0.0.1:0".parse().unwrap(),
            sync_bind: "127.0.0.1:0".parse().unwrap(),
            store_path: dir.path().join("n.db"),
            ..NodeConfig::default()
        };
        let node = ServerNode::bind(config).await.unwrap();
        assert_ne!(node.client_addr().unwrap().port(), 0);
        assert_ne!(node.sync_addr().unwrap().port(), 0);
        assert_eq!(*node.subscribe_role().borrow(), ServerRole::Joining);
    }

    #[tokio::test]
    async fn test_unreachable_directory_fails_startup() {
        let dir = TempDir::new().unwrap();
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = NodeConfig {
            directory: silent.local_addr().unwrap(),
            client_bind: "127.0.0.1:0".parse().unwrap(),
            sync_bind: "127.0.0.1:0".parse().unwrap(),
            store_path: dir.path().join("n.db"),
            heartbeat_interval: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(100),
            register_attempts: 2,
            ..NodeConfig::default()
        };
        let node = ServerNode::bind(config).await.unwrap();
        let err = node.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, NodeError::Directory(DirectoryError::Timeout { attempts: 2 })));
    }
}
