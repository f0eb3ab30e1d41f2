//! tandem - primary/standby replication with a liveness directory
//!
//! - `directory`: registry of live server nodes; the earliest registered is
//!   the primary
//! - `server`: server node role machine, client gateway and application
//! - `replication`: state transfer and the versioned update stream
//! - `client`: client session with discovery and reconnect
//! - `store`: the versioned file store both sides replicate

pub mod cli;
pub mod client;
pub mod directory;
pub mod observability;
pub mod replication;
pub mod server;
pub mod store;
