//! Directory service
//!
//! One UDP socket, one datagram per request, one reply per well-formed
//! request. Requests are handled one at a time on the receive loop; the
//! eviction sweep and the optional summary run as separate timer tasks that
//! share the registry.
//!
//! The directory never pushes anything. Nodes learn their role from the
//! heartbeat acknowledgement, clients learn the primary by asking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::DirectoryConfig;
use super::errors::{DirectoryError, DirectoryResult};
use super::protocol::{DirectoryRequest, DirectoryResponse, NodeRole, NO_SERVER_AVAILABLE};
use super::registry::{NodeRecord, Registry};
use crate::observability::Event;

/// Largest datagram the directory reads
const MAX_DATAGRAM: usize = 2048;

/// Directory service bound to its UDP socket.
pub struct DirectoryService {
    socket: UdpSocket,
    registry: Arc<Registry>,
    config: DirectoryConfig,
    heartbeats: Arc<AtomicU64>,
}

impl DirectoryService {
    /// Validate `config` and bind the UDP socket.
    pub async fn bind(config: DirectoryConfig) -> DirectoryResult<Self> {
        config.validate().map_err(DirectoryError::InvalidConfig)?;

        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|source| DirectoryError::Bind {
                addr: config.bind,
                source,
            })?;

        Ok(Self {
            socket,
            registry: Arc::new(Registry::new()),
            config,
            heartbeats: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> DirectoryResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Shared handle on the registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Serve forever.
    ///
    /// Timer tasks are tied to this future: dropping or aborting it stops
    /// them too.
    pub async fn run(self) -> DirectoryResult<()> {
        let local = self.local_addr()?;
        info!(
            event = %Event::Serving,
            addr = %local,
            node_timeout_ms = self.config.node_timeout.as_millis() as u64,
            "directory ready"
        );

        let mut tasks = BackgroundTasks::default();
        tasks.push(tokio::spawn(sweep_loop(
            Arc::clone(&self.registry),
            self.config.sweep_interval,
            self.config.node_timeout,
        )));
        if let Some(every) = self.config.summary_interval {
            tasks.push(tokio::spawn(summary_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.heartbeats),
                every,
            )));
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "directory receive failed");
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            let request = match DirectoryRequest::parse(&text) {
                Ok(request) => request,
                Err(e) => {
                    warn!(event = %Event::MalformedDatagram, from = %from, error = %e, "ignoring datagram");
                    continue;
                }
            };

            if matches!(request, DirectoryRequest::Heartbeat(_)) {
                self.heartbeats.fetch_add(1, Ordering::Relaxed);
            }

            let response = handle_request(&self.registry, request, from);
            if let Err(e) = self.socket.send_to(response.encode().as_bytes(), from).await {
                warn!(to = %from, error = %e, "directory reply failed");
            }
        }
    }
}

/// Answer one well-formed request against the registry.
///
/// Bare legacy forms carry no client port; the sender's UDP source port is
/// used as its identity instead.
pub fn handle_request(
    registry: &Registry,
    request: DirectoryRequest,
    from: SocketAddr,
) -> DirectoryResponse {
    match request {
        DirectoryRequest::Register {
            client_port,
            sync_port,
        } => {
            let client_port = client_port.unwrap_or_else(|| from.port());
            let registration = registry.upsert(from.ip(), client_port, sync_port);
            let record = &registration.record;

            if registration.is_new {
                info!(
                    event = %Event::NodeRegistered,
                    node = %record.endpoint(),
                    nodes = registry.len(),
                    "node registered"
                );
            } else {
                debug!(event = %Event::NodeRefreshed, node = %record.endpoint(), "node re-registered");
            }

            match registration.primary {
                Some(primary) => {
                    if registration.is_new && primary.key() == record.key() {
                        info!(event = %Event::PrimaryChanged, primary = %primary.endpoint(), "new primary");
                    }
                    DirectoryResponse::Primary(primary.endpoint())
                }
                None => DirectoryResponse::Error(NO_SERVER_AVAILABLE.to_string()),
            }
        }

        DirectoryRequest::Heartbeat(info) => {
            let client_port = info.map(|i| i.client_port).unwrap_or_else(|| from.port());
            let is_primary = match registry.refresh(from.ip(), client_port) {
                Some(is_primary) => is_primary,
                None => {
                    warn!(
                        event = %Event::HeartbeatUnknownNode,
                        from = %from,
                        client_port,
                        "heartbeat from unregistered node"
                    );
                    false
                }
            };

            match info {
                Some(info) => {
                    debug!(from = %from, version = info.version, is_primary, "heartbeat");
                    let role = if is_primary {
                        NodeRole::Primary
                    } else {
                        NodeRole::Standby
                    };
                    DirectoryResponse::HeartbeatAck(Some(role))
                }
                None => DirectoryResponse::HeartbeatAck(None),
            }
        }

        DirectoryRequest::ClientLookup => match registry.primary() {
            Some(primary) => DirectoryResponse::Primary(primary.endpoint()),
            None => {
                debug!(event = %Event::NoPrimary, from = %from, "lookup with empty registry");
                DirectoryResponse::Error(NO_SERVER_AVAILABLE.to_string())
            }
        },
    }
}

async fn sweep_loop(registry: Arc<Registry>, every: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let outcome = registry.sweep(Instant::now(), timeout);

        for node in &outcome.evicted {
            warn!(
                event = %Event::NodeEvicted,
                node = %node.endpoint(),
                last_seen = %node.last_seen.format("%H:%M:%S"),
                "node evicted"
            );
        }

        if outcome.head_changed() {
            let nodes = describe(&registry.snapshot());
            match &outcome.primary {
                Some(primary) => info!(
                    event = %Event::PrimaryChanged,
                    primary = %primary.endpoint(),
                    nodes = %nodes,
                    "new primary"
                ),
                None => warn!(event = %Event::NoPrimary, "no live nodes left"),
            }
        }
    }
}

async fn summary_loop(registry: Arc<Registry>, heartbeats: Arc<AtomicU64>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let received = heartbeats.swap(0, Ordering::Relaxed);
        let primary = registry
            .primary()
            .map(|p| p.endpoint().to_string())
            .unwrap_or_else(|| "none".to_string());

        info!(
            event = %Event::DirectorySummary,
            nodes = registry.len(),
            primary = %primary,
            heartbeats = received,
            "directory summary"
        );
    }
}

fn describe(nodes: &[NodeRecord]) -> String {
    nodes
        .iter()
        .map(|n| n.endpoint().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Timer tasks aborted together with the owner.
#[derive(Default)]
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl BackgroundTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
