//! Server Node
//!
//! A node registers with the directory, follows the role it is assigned and
//! serves the line-oriented client protocol while it is primary. Standbys
//! apply the primary's replication stream and refuse clients.

mod application;
mod config;
mod credentials;
mod errors;
mod gateway;
mod node;

pub use application::{Application, ErrorCode, Notification, Reply, Request, Session};
pub use config::NodeConfig;
pub use credentials::{hash_password, verify_password};
pub use errors::{NodeError, NodeResult};
pub use gateway::{run_gateway, serve_client, SessionEnd};
pub use node::ServerNode;
