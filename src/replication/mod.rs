//! Replication Subsystem
//!
//! - Single writer: only the node the directory reports as primary commits
//! - Standbys consume history, never create it
//! - Versions are dense: standby history is always a prefix of the primary's
//! - Divergence is fail-stop; there is no repair path
//!
//! A joining standby first copies the primary's store through
//! [`fetch_snapshot`], then follows the multicast stream of updates.

mod config;
mod errors;
mod message;
mod receiver;
mod role;
mod sender;
mod state_transfer;

pub use config::{ReplicationConfig, DEFAULT_GROUP, DEFAULT_GROUP_PORT};
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
pub use message::ReplicationMessage;
pub use receiver::{apply_update, bind_receiver, ReceiveDecision, ReceiveOutcome, UpdateReceiver};
pub use role::{ServerRole, TerminationReason};
pub use sender::{commit, run_heartbeats, ReplicationSender};
pub use state_transfer::{fetch_snapshot, run_sync_listener, serve_snapshot};
