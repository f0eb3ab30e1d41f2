//! Client session configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use super::errors::{ClientError, ClientResult};
use crate::directory::DEFAULT_DIRECTORY_PORT;

/// Client session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Directory UDP address
    pub directory: SocketAddr,

    /// Wait per lookup attempt
    pub discovery_timeout: Duration,

    /// Lookup attempts before giving up
    pub discovery_attempts: u32,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Read timeout until the session is authenticated
    pub read_timeout: Duration,

    /// Wait before re-asking when the directory repeats a dead endpoint
    pub cooldown: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::LOCALHOST,
                DEFAULT_DIRECTORY_PORT,
            )),
            discovery_timeout: Duration::from_secs(3),
            discovery_attempts: 3,
            connect_timeout: Duration::from_secs(4),
            read_timeout: Duration::from_secs(30),
            cooldown: Duration::from_secs(20),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if !self.directory.is_ipv4() {
            return Err(ClientError::InvalidConfig(format!(
                "directory address {} is not IPv4",
                self.directory
            )));
        }
        if self.discovery_attempts == 0 {
            return Err(ClientError::InvalidConfig(
                "discovery_attempts must be >= 1".into(),
            ));
        }
        if self.discovery_timeout.is_zero()
            || self.connect_timeout.is_zero()
            || self.read_timeout.is_zero()
        {
            return Err(ClientError::InvalidConfig("timeouts must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = ClientConfig {
            discovery_attempts: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_ipv6_directory_rejected() {
        let config = ClientConfig {
            directory: "[::1]:4000".parse().unwrap(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));
    }
}
