//! Directory
//!
//! The single coordination point of a tandem deployment. It keeps the
//! liveness registry of server nodes and answers three questions over UDP:
//! "I am here" (registration), "am I still alive, and what am I?"
//! (heartbeat) and "who is primary?" (client lookup).
//!
//! The primary is not elected; it is whichever live node registered first.
//! When it stops heartbeating it is evicted and the next node in arrival
//! order becomes the head.

mod client;
mod config;
mod errors;
mod protocol;
mod registry;
mod service;

pub use client::DirectoryClient;
pub use config::{DirectoryConfig, DEFAULT_DIRECTORY_PORT};
pub use errors::{DirectoryError, DirectoryResult};
pub use protocol::{
    DirectoryRequest, DirectoryResponse, Endpoint, HeartbeatInfo, NodeRole, NO_SERVER_AVAILABLE,
};
pub use registry::{NodeKey, NodeRecord, Registration, Registry, SweepOutcome};
pub use service::{handle_request, DirectoryService};
