//! Directory configuration
//!
//! Built from command-line arguments at startup and immutable afterwards.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default UDP port of the directory
pub const DEFAULT_DIRECTORY_PORT: u16 = 4000;

/// Directory configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Address the UDP socket binds to
    pub bind: SocketAddr,

    /// A node silent for longer than this is evicted.
    ///
    /// Should stay comfortably above several heartbeat intervals so a lost
    /// datagram or two does not cost a node its place.
    pub node_timeout: Duration,

    /// How often the eviction sweep runs. Must be shorter than
    /// `node_timeout`.
    pub sweep_interval: Duration,

    /// How often a one-line summary is logged; `None` disables it.
    pub summary_interval: Option<Duration>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_DIRECTORY_PORT,
            )),
            node_timeout: Duration::from_secs(17),
            sweep_interval: Duration::from_secs(5),
            summary_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl DirectoryConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.bind.is_ipv4() {
            return Err(format!("bind address {} is not IPv4", self.bind));
        }
        if self.node_timeout.is_zero() {
            return Err("node_timeout must be > 0".into());
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".into());
        }
        if self.sweep_interval >= self.node_timeout {
            return Err(format!(
                "sweep_interval ({:?}) must be shorter than node_timeout ({:?})",
                self.sweep_interval, self.node_timeout
            ));
        }
        if matches!(self.summary_interval, Some(d) if d.is_zero()) {
            return Err("summary_interval must be > 0 when enabled".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DirectoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind.port(), 4000);
    }

    #[test]
    fn test_sweep_must_be_shorter_than_timeout() {
        let config = DirectoryConfig {
            sweep_interval: Duration::from_secs(20),
            ..DirectoryConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("sweep_interval"));
    }

    #[test]
    fn test_ipv6_bind_rejected() {
        let config = DirectoryConfig {
            bind: "[::1]:4000".parse().unwrap(),
            ..DirectoryConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("IPv4"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = DirectoryConfig {
            node_timeout: Duration::ZERO,
            ..DirectoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
