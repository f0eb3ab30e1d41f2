//! Replication wire format
//!
//! ```text
//! HEARTBEAT:<version>:<client_port>:<sync_port>
//! HEARTBEAT_UPDATE:<version>:<client_port>:<sync_port>:QUERY:<command>
//! ```
//!
//! `<command>` is the JSON form of a [`WriteCommand`] and runs to the end of
//! the datagram, so it may contain `:` freely.

use super::errors::{ReplicationError, ReplicationResult};
use crate::store::WriteCommand;

const HEARTBEAT: &str = "HEARTBEAT";
const UPDATE: &str = "HEARTBEAT_UPDATE";
const QUERY: &str = "QUERY";

/// One replication datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMessage {
    /// Periodic liveness and version announcement
    Heartbeat {
        version: u64,
        client_port: u16,
        sync_port: u16,
    },
    /// A committed write
    Update {
        version: u64,
        client_port: u16,
        sync_port: u16,
        command: WriteCommand,
    },
}

impl ReplicationMessage {
    /// Version announced by the primary.
    pub fn version(&self) -> u64 {
        match self {
            Self::Heartbeat { version, .. } | Self::Update { version, .. } => *version,
        }
    }

    /// Command carried by an update.
    pub fn command(&self) -> Option<&WriteCommand> {
        match self {
            Self::Heartbeat { .. } => None,
            Self::Update { command, .. } => Some(command),
        }
    }

    /// Encode for sending.
    pub fn encode(&self) -> ReplicationResult<String> {
        match self {
            Self::Heartbeat {
                version,
                client_port,
                sync_port,
            } => Ok(format!(
                "{}:{}:{}:{}",
                HEARTBEAT, version, client_port, sync_port
            )),
            Self::Update {
                version,
                client_port,
                sync_port,
                command,
            } => {
                let body = command
                    .to_wire()
                    .map_err(|e| ReplicationError::malformed(e.to_string()))?;
                Ok(format!(
                    "{}:{}:{}:{}:{}:{}",
                    UPDATE, version, client_port, sync_port, QUERY, body
                ))
            }
        }
    }

    /// Parse a received datagram.
    pub fn parse(message: &str) -> ReplicationResult<Self> {
        let message = message.trim_end_matches(['\r', '\n', '\0']);
        let (tag, rest) = message
            .split_once(':')
            .ok_or_else(|| ReplicationError::malformed(format!("no tag in '{}'", message)))?;

        match tag {
            HEARTBEAT => {
                let fields: Vec<&str> = rest.split(':').collect();
                match fields.as_slice() {
                    [version, cp, sp] => Ok(Self::Heartbeat {
                        version: parse_number(version, "version")?,
                        client_port: parse_number(cp, "client port")?,
                        sync_port: parse_number(sp, "sync port")?,
                    }),
                    _ => Err(ReplicationError::malformed(format!(
                        "heartbeat needs 3 fields: '{}'",
                        message
                    ))),
                }
            }
            UPDATE => {
                let fields: Vec<&str> = rest.splitn(5, ':').collect();
                match fields.as_slice() {
                    [version, cp, sp, QUERY, body] => {
                        let command = WriteCommand::from_wire(body)
                            .map_err(|e| ReplicationError::malformed(e.to_string()))?;
                        Ok(Self::Update {
                            version: parse_number(version, "version")?,
                            client_port: parse_number(cp, "client port")?,
                            sync_port: parse_number(sp, "sync port")?,
                            command,
                        })
                    }
                    _ => Err(ReplicationError::malformed(format!(
                        "update needs version, ports and QUERY: '{}'",
                        message
                    ))),
                }
            }
            other => Err(ReplicationError::malformed(format!(
                "unknown message tag '{}'",
                other
            ))),
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, what: &str) -> ReplicationResult<T> {
    field
        .trim()
        .parse()
        .map_err(|_| ReplicationError::malformed(format!("bad {} '{}'", what, field)))
}
