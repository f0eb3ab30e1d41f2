//! Server node configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::directory::DEFAULT_DIRECTORY_PORT;
use crate::replication::ReplicationConfig;

use super::errors::{NodeError, NodeResult};

/// Server node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Directory UDP address
    pub directory: SocketAddr,

    /// Client gateway bind address; port 0 picks a free port
    pub client_bind: SocketAddr,

    /// State-transfer listener bind address; port 0 picks a free port
    pub sync_bind: SocketAddr,

    /// Store file
    pub store_path: PathBuf,

    /// Replication transport
    pub replication: ReplicationConfig,

    /// Directory heartbeat period
    pub heartbeat_interval: Duration,

    /// How long to wait for each directory answer
    pub ack_timeout: Duration,

    /// Attempts for the initial registration
    pub register_attempts: u32,

    /// Connect timeout for state transfer
    pub connect_timeout: Duration,

    /// Upper bound on one whole state transfer
    pub transfer_timeout: Duration,

    /// A client must authenticate within this time
    pub pre_auth_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let any = |port| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        Self {
            directory: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::LOCALHOST,
                DEFAULT_DIRECTORY_PORT,
            )),
            client_bind: any(0),
            sync_bind: any(0),
            store_path: PathBuf::from("tandem.db"),
            replication: ReplicationConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(2),
            register_attempts: 3,
            connect_timeout: Duration::from_secs(4),
            transfer_timeout: Duration::from_secs(30),
            pre_auth_timeout: Duration::from_secs(30),
        }
    }
}

impl NodeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> NodeResult<()> {
        for (name, addr) in [
            ("directory", self.directory),
            ("client_bind", self.client_bind),
            ("sync_bind", self.sync_bind),
        ] {
            if !addr.is_ipv4() {
                return Err(NodeError::InvalidConfig(format!("{} {} is not IPv4", name, addr)));
            }
        }
        if self.heartbeat_interval.is_zero() {
            return Err(NodeError::InvalidConfig("heartbeat_interval must be > 0".into()));
        }
        if self.ack_timeout.is_zero() || self.ack_timeout >= self.heartbeat_interval {
            return Err(NodeError::InvalidConfig(format!(
                "ack_timeout ({:?}) must be > 0 and shorter than heartbeat_interval ({:?})",
                self.ack_timeout, self.heartbeat_interval
            )));
        }
        if self.register_attempts == 0 {
            return Err(NodeError::InvalidConfig("register_attempts must be >= 1".into()));
        }
        if self.connect_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err(NodeError::InvalidConfig("transfer timeouts must be > 0".into()));
        }
        if self.pre_auth_timeout.is_zero() {
            return Err(NodeError::InvalidConfig("pre_auth_timeout must be > 0".into()));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(NodeError::InvalidConfig("store_path must not be empty".into()));
        }
        self.replication.validate()?;
        Ok(())
    }
}
