//! Liveness Registry
//!
//! Ordered set of live server nodes. Arrival order is preserved and the head
//! of the list is, by definition, the primary: the oldest registration that
//! is still alive. Heartbeats refresh a record in place and never reorder.
//!
//! Every operation runs under one lock, including the eviction sweep, so a
//! lookup can never observe a half-swept registry.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::protocol::Endpoint;

/// Identity of a node: its address and client port.
pub type NodeKey = (IpAddr, u16);

/// One known server node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub address: IpAddr,
    pub client_port: u16,
    pub sync_port: Option<u16>,
    /// Monotonic time of the last registration or heartbeat
    pub last_heartbeat_at: Instant,
    /// Wall-clock twin of `last_heartbeat_at`, for logs
    pub last_seen: DateTime<Local>,
    pub registered_at: DateTime<Local>,
}

impl NodeRecord {
    fn new(address: IpAddr, client_port: u16, sync_port: Option<u16>, now: Instant) -> Self {
        let wall = Local::now();
        Self {
            address,
            client_port,
            sync_port,
            last_heartbeat_at: now,
            last_seen: wall,
            registered_at: wall,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_heartbeat_at = now;
        self.last_seen = Local::now();
    }

    /// Identity key.
    pub fn key(&self) -> NodeKey {
        (self.address, self.client_port)
    }

    /// Endpoint as announced to clients and standbys.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address, self.client_port, self.sync_port)
    }

    fn matches(&self, address: IpAddr, client_port: u16) -> bool {
        self.address == address && self.client_port == client_port
    }
}

/// Result of a registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The sender's record after the upsert
    pub record: NodeRecord,
    /// True if the sender was not known before
    pub is_new: bool,
    /// The head at the time of the upsert (never `None` after an upsert)
    pub primary: Option<NodeRecord>,
}

/// Result of an eviction sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Records removed, in registry order
    pub evicted: Vec<NodeRecord>,
    /// Head before the sweep
    pub previous_primary: Option<NodeKey>,
    /// Head after the sweep
    pub primary: Option<NodeRecord>,
}

impl SweepOutcome {
    /// Whether the sweep changed who the primary is.
    pub fn head_changed(&self) -> bool {
        self.previous_primary != self.primary.as_ref().map(NodeRecord::key)
    }
}

/// The registry itself.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: Mutex<Vec<NodeRecord>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an unseen node at the tail, or refresh a known one in place.
    pub fn upsert(&self, address: IpAddr, client_port: u16, sync_port: Option<u16>) -> Registration {
        self.upsert_at(address, client_port, sync_port, Instant::now())
    }

    /// [`Registry::upsert`] with an explicit clock.
    pub fn upsert_at(
        &self,
        address: IpAddr,
        client_port: u16,
        sync_port: Option<u16>,
        now: Instant,
    ) -> Registration {
        let mut nodes = self.nodes.lock();

        let (record, is_new) = match nodes.iter_mut().find(|n| n.matches(address, client_port)) {
            Some(existing) => {
                existing.touch(now);
                if sync_port.is_some() {
                    existing.sync_port = sync_port;
                }
                (existing.clone(), false)
            }
            None => {
                let record = NodeRecord::new(address, client_port, sync_port, now);
                nodes.push(record.clone());
                (record, true)
            }
        };

        Registration {
            record,
            is_new,
            primary: nodes.first().cloned(),
        }
    }

    /// Heartbeat path: refresh a known node.
    ///
    /// Returns `Some(true)` if the node is the primary, `Some(false)` if it
    /// is a standby, `None` if it is unknown (nothing is inserted).
    pub fn refresh(&self, address: IpAddr, client_port: u16) -> Option<bool> {
        self.refresh_at(address, client_port, Instant::now())
    }

    /// [`Registry::refresh`] with an explicit clock.
    pub fn refresh_at(&self, address: IpAddr, client_port: u16, now: Instant) -> Option<bool> {
        let mut nodes = self.nodes.lock();
        let index = nodes.iter().position(|n| n.matches(address, client_port))?;
        nodes[index].touch(now);
        Some(index == 0)
    }

    /// Remove every node not heard from for longer than `timeout`.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> SweepOutcome {
        let mut nodes = self.nodes.lock();
        let previous_primary = nodes.first().map(NodeRecord::key);

        let mut evicted = Vec::new();
        nodes.retain(|n| {
            let silent_for = now.saturating_duration_since(n.last_heartbeat_at);
            if silent_for > timeout {
                evicted.push(n.clone());
                false
            } else {
                true
            }
        });

        SweepOutcome {
            evicted,
            previous_primary,
            primary: nodes.first().cloned(),
        }
    }

    /// The head of the registry, if any.
    pub fn primary(&self) -> Option<NodeRecord> {
        self.nodes.lock().first().cloned()
    }

    /// Copy of all records in registry order.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.nodes.lock().clone()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// True if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}
