//! File-backed versioned store
//!
//! The whole store is one file: a header line `TANDEM1 <crc32>` followed by
//! the JSON document. Every write rewrites the file through a temporary
//! sibling and an atomic rename, so the file on disk is always either the
//! previous or the next complete state. That same file is what state
//! transfer streams to a joining standby.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};

use super::command::WriteCommand;
use super::errors::{StoreError, StoreResult};

/// Header magic of the store file format
pub const STORE_MAGIC: &str = "TANDEM1";

/// The two operations the replication core needs from a store.
pub trait VersionedStore {
    /// Number of writes committed to this store.
    fn version(&self) -> u64;

    /// Apply a write and bump the version by exactly one.
    ///
    /// Returns the new version. On error the store is unchanged.
    fn apply_write(&mut self, command: &WriteCommand) -> StoreResult<u64>;
}

/// A user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// SHA-256 hex of the password
    pub password_hash: String,
}

/// A stored value and the user who wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    pub owner: String,
}

/// Persisted state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Version counter, persisted with the data it counts
    pub version: u64,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    pub entries: BTreeMap<String, Entry>,
}

impl StoreDocument {
    /// Apply a command to this document without touching the version.
    fn apply(&mut self, command: &WriteCommand) -> StoreResult<()> {
        match command {
            WriteCommand::CreateUser {
                username,
                password_hash,
            } => {
                if username.is_empty() {
                    return Err(StoreError::Invalid("empty username".into()));
                }
                if self.users.contains_key(username) {
                    return Err(StoreError::Conflict(format!(
                        "user '{}' already exists",
                        username
                    )));
                }
                self.users.insert(
                    username.clone(),
                    UserRecord {
                        password_hash: password_hash.clone(),
                    },
                );
            }
            WriteCommand::Put { key, value, owner } => {
                if key.is_empty() {
                    return Err(StoreError::Invalid("empty key".into()));
                }
                self.check_owner(key, owner)?;
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        owner: owner.clone(),
                    },
                );
            }
            WriteCommand::Delete { key, owner } => {
                if !self.entries.contains_key(key) {
                    return Err(StoreError::NotFound(format!("key '{}'", key)));
                }
                self.check_owner(key, owner)?;
                self.entries.remove(key);
            }
        }
        Ok(())
    }

    fn check_owner(&self, key: &str, owner: &str) -> StoreResult<()> {
        match self.entries.get(key) {
            Some(entry) if entry.owner != owner => Err(StoreError::PermissionDenied(format!(
                "key '{}' belongs to '{}'",
                key, entry.owner
            ))),
            _ => Ok(()),
        }
    }
}

/// Encode a document into the on-disk format.
pub fn encode(doc: &StoreDocument) -> StoreResult<Vec<u8>> {
    let body = serde_json::to_vec(doc)?;
    let checksum = crc32fast::hash(&body);
    let mut out = format!("{} {:08x}\n", STORE_MAGIC, checksum).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode and verify bytes in the on-disk format.
pub fn decode(bytes: &[u8]) -> StoreResult<StoreDocument> {
    let newline = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StoreError::Corrupted("missing header line".into()))?;

    let header = std::str::from_utf8(&bytes[..newline])
        .map_err(|_| StoreError::Corrupted("header is not UTF-8".into()))?;
    let body = &bytes[newline + 1..];

    let (magic, checksum_hex) = header
        .split_once(' ')
        .ok_or_else(|| StoreError::Corrupted(format!("malformed header '{}'", header)))?;
    if magic != STORE_MAGIC {
        return Err(StoreError::Corrupted(format!("unknown magic '{}'", magic)));
    }
    let expected = u32::from_str_radix(checksum_hex, 16)
        .map_err(|_| StoreError::Corrupted(format!("bad checksum field '{}'", checksum_hex)))?;

    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(StoreError::Corrupted(format!(
            "checksum mismatch: header {:08x}, body {:08x}",
            expected, actual
        )));
    }

    serde_json::from_slice(body)
        .map_err(|e| StoreError::Corrupted(format!("undecodable body: {}", e)))
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = temp_path(path);

    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;

    // Make the rename itself durable where the platform allows it.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Run blocking file I/O, moving off the async worker on a multi-thread
/// runtime. Elsewhere `f` just runs in place.
fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// File-backed store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    doc: StoreDocument,
}

impl FileStore {
    /// Open the store at `path`, creating an empty version-0 store if the
    /// file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let doc = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
            decode(&bytes)?
        } else {
            let doc = StoreDocument::default();
            write_atomic(&path, &encode(&doc)?)?;
            doc
        };

        Ok(Self { path, doc })
    }

    /// Validate snapshot bytes and atomically install them at `path`.
    ///
    /// Nothing at `path` is touched unless the bytes decode cleanly.
    pub fn install_snapshot(path: &Path, bytes: &[u8]) -> StoreResult<StoreDocument> {
        let doc = decode(bytes)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        write_atomic(path, bytes)?;
        Ok(doc)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory document.
    pub fn document(&self) -> &StoreDocument {
        &self.doc
    }

    /// Look up a user.
    pub fn user(&self, username: &str) -> Option<&UserRecord> {
        self.doc.users.get(username)
    }

    /// Read a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.doc.entries.get(key).map(|e| e.value.as_str())
    }

    /// Exact bytes of the persisted file, for state transfer.
    pub fn snapshot_bytes(&self) -> StoreResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))
    }

    /// Force the backing file to disk.
    pub fn flush(&self) -> StoreResult<()> {
        let file = File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&self.path, e))
    }
}

impl VersionedStore for FileStore {
    fn version(&self) -> u64 {
        self.doc.version
    }

    fn apply_write(&mut self, command: &WriteCommand) -> StoreResult<u64> {
        let mut next = self.doc.clone();
        next.apply(command)?;
        next.version += 1;

        let bytes = encode(&next)?;
        off_worker(|| write_atomic(&self.path, &bytes))?;
        self.doc = next;
        Ok(self.doc.version)
    }
}
