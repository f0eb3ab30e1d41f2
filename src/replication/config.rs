//! Replication Configuration
//!
//! Configured from the command line, immutable after startup.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use super::errors::{ReplicationError, ReplicationResult};

/// Default multicast group
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 44, 44);

/// Default multicast port
pub const DEFAULT_GROUP_PORT: u16 = 4446;

/// Replication transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Where updates and heartbeats are sent.
    ///
    /// Normally a multicast group. A unicast address is accepted too, in
    /// which case the transport degrades to plain UDP to a single standby.
    pub group: SocketAddr,

    /// Local interface used to join the group
    pub interface: Ipv4Addr,

    /// Multicast TTL; 1 keeps traffic on the local segment
    pub ttl: u32,

    /// Period of replication heartbeats while primary
    pub heartbeat_interval: Duration,

    /// Receiver bind address override.
    ///
    /// Defaults to the group port on all interfaces for a multicast group,
    /// or the group address itself for a unicast target.
    pub listen: Option<SocketAddr>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            group: SocketAddr::V4(SocketAddrV4::new(DEFAULT_GROUP, DEFAULT_GROUP_PORT)),
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            heartbeat_interval: Duration::from_secs(5),
            listen: None,
        }
    }
}

impl ReplicationConfig {
    /// Whether the target is a multicast group.
    pub fn is_multicast(&self) -> bool {
        self.group.ip().is_multicast()
    }

    /// Address the receiver binds.
    pub fn listen_addr(&self) -> SocketAddr {
        match (self.listen, self.group) {
            (Some(listen), _) => listen,
            (None, SocketAddr::V4(group)) if group.ip().is_multicast() => {
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()))
            }
            (None, group) => group,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReplicationResult<()> {
        if !self.group.is_ipv4() {
            return Err(ReplicationError::configuration_error(
                "replication group must be an IPv4 address",
            ));
        }
        if self.group.port() == 0 {
            return Err(ReplicationError::configuration_error(
                "replication group port must be non-zero",
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ReplicationError::configuration_error(
                "heartbeat_interval must be > 0",
            ));
        }
        if self.ttl == 0 {
            return Err(ReplicationError::configuration_error("ttl must be >= 1"));
        }
        if matches!(self.listen, Some(listen) if !listen.is_ipv4()) {
            return Err(ReplicationError::configuration_error(
                "replication listen address must be IPv4",
            ));
        }
        Ok(())
    }
}
