//! CLI argument definitions using clap
//!
//! Commands:
//! - tandem directory [--bind <addr>] ...
//! - tandem server --directory <addr> [--store <path>] ...
//! - tandem client --directory <addr> ...

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::client::ClientConfig;
use crate::directory::DirectoryConfig;
use crate::replication::ReplicationConfig;
use crate::server::NodeConfig;

/// tandem - primary/standby replicated service with a liveness directory
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level or filter directive (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format: compact or json
    #[arg(long, global = true, default_value = "compact")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the directory service
    Directory(DirectoryArgs),

    /// Run a server node
    Server(ServerArgs),

    /// Interactive client: one request per stdin line
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DirectoryArgs {
    /// UDP address to listen on
    #[arg(long, default_value = "0.0.0.0:4000")]
    pub bind: SocketAddr,

    /// Evict nodes silent for longer than this many seconds
    #[arg(long, default_value_t = 17)]
    pub node_timeout_secs: u64,

    /// Eviction sweep period in seconds
    #[arg(long, default_value_t = 5)]
    pub sweep_interval_secs: u64,

    /// Summary log period in seconds; 0 disables it
    #[arg(long, default_value_t = 60)]
    pub summary_interval_secs: u64,
}

impl DirectoryArgs {
    pub fn to_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            bind: self.bind,
            node_timeout: Duration::from_secs(self.node_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            summary_interval: (self.summary_interval_secs > 0)
                .then(|| Duration::from_secs(self.summary_interval_secs)),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Directory UDP address
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub directory: SocketAddr,

    /// Client gateway TCP address; port 0 picks one
    #[arg(long, default_value = "0.0.0.0:0")]
    pub client_bind: SocketAddr,

    /// State-transfer TCP address; port 0 picks one
    #[arg(long, default_value = "0.0.0.0:0")]
    pub sync_bind: SocketAddr,

    /// Store file
    #[arg(long, default_value = "tandem.db")]
    pub store: PathBuf,

    /// Replication group (multicast) or single standby (unicast)
    #[arg(long, default_value = "239.255.44.44:4446")]
    pub group: SocketAddr,

    /// Interface used for multicast
    #[arg(long, default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Multicast TTL
    #[arg(long, default_value_t = 1)]
    pub ttl: u32,

    /// Replication receiver bind address, if not the group port
    #[arg(long)]
    pub replication_listen: Option<SocketAddr>,

    /// Directory and replication heartbeat period in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub heartbeat_interval_ms: u64,

    /// Directory answer timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub ack_timeout_ms: u64,
}

impl ServerArgs {
    pub fn to_config(&self) -> NodeConfig {
        let heartbeat_interval = Duration::from_millis(self.heartbeat_interval_ms);
        NodeConfig {
            directory: self.directory,
            client_bind: self.client_bind,
            sync_bind: self.sync_bind,
            store_path: self.store.clone(),
            replication: ReplicationConfig {
                group: self.group,
                interface: self.interface,
                ttl: self.ttl,
                heartbeat_interval,
                listen: self.replication_listen,
            },
            heartbeat_interval,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            ..NodeConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Directory UDP address
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub directory: SocketAddr,

    /// Wait per directory lookup attempt in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub discovery_timeout_ms: u64,

    /// Directory lookup attempts
    #[arg(long, default_value_t = 3)]
    pub discovery_attempts: u32,

    /// Wait before re-asking when the directory repeats a dead primary
    #[arg(long, default_value_t = 20)]
    pub cooldown_secs: u64,
}

impl ClientArgs {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            directory: self.directory,
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            discovery_attempts: self.discovery_attempts,
            cooldown: Duration::from_secs(self.cooldown_secs),
            ..ClientConfig::default()
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_defaults() {
        let cli = Cli::try_parse_from(["tandem", "directory"]).unwrap();
        let Command::Directory(args) = cli.command else {
            panic!("expected directory command");
        };
        assert_eq!(args.to_config(), DirectoryConfig::default());
    }

    #[test]
    fn test_server_flags() {
        let cli = Cli::try_parse_from([
            "tandem",
            "server",
            "--store",
            "/tmp/a.db",
            "--group",
            "127.0.0.1:7000",
            "--heartbeat-interval-ms",
            "1000",
            "--ack-timeout-ms",
            "300",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, "json");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = args.to_config();
        assert_eq!(config.store_path, PathBuf::from("/tmp/a.db"));
        assert!(!config.replication.is_multicast());
        assert_eq!(config.replication.heartbeat_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_summary_can_be_disabled() {
        let cli =
            Cli::try_parse_from(["tandem", "directory", "--summary-interval-secs", "0"]).unwrap();
        let Command::Directory(args) = cli.command else {
            panic!("expected directory command");
        };
        assert_eq!(args.to_config().summary_interval, None);
    }
}
