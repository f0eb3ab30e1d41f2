//! Versioned Store
//!
//! The boundary between the replication core and the application's data.
//! The core only needs two things from it: apply a write (which bumps the
//! version counter by one) and read the current version. State transfer
//! additionally moves the whole persisted file.
//!
//! A node holds its store behind one coarse async mutex ([`SharedStore`]).
//! Client commits, replicated updates, version reads and snapshot streaming
//! all take that same lock, so mutations are strictly serialised.

mod command;
mod errors;
mod file_store;

pub use command::WriteCommand;
pub use errors::{StoreError, StoreResult};
pub use file_store::{
    decode, encode, Entry, FileStore, StoreDocument, UserRecord, VersionedStore, STORE_MAGIC,
};

use std::sync::Arc;

use tokio::sync::Mutex;

/// The store as shared by every task of a server node.
pub type SharedStore = Arc<Mutex<FileStore>>;

/// Wrap an opened store for sharing.
pub fn shared(store: FileStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}
