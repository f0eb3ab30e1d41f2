//! Typed write commands
//!
//! A `WriteCommand` is the unit of replication: the primary commits it
//! locally and broadcasts it verbatim, standbys replay it against their own
//! store. Commands carry every value the mutation needs (password hashes
//! are computed before the command is built) so replay is deterministic.

use serde::{Deserialize, Serialize};

use super::errors::StoreResult;

/// A serialisable description of one store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteCommand {
    /// Create a user account
    CreateUser {
        username: String,
        password_hash: String,
    },

    /// Insert or overwrite a key owned by `owner`
    Put {
        key: String,
        value: String,
        owner: String,
    },

    /// Remove an existing key owned by `owner`
    Delete { key: String, owner: String },
}

impl WriteCommand {
    /// Encode for the replication wire.
    pub fn to_wire(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the replication wire.
    pub fn from_wire(s: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteCommand::CreateUser { .. } => "create_user",
            WriteCommand::Put { .. } => "put",
            WriteCommand::Delete { .. } => "delete",
        }
    }
}
