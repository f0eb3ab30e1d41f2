//! Directory wire protocol
//!
//! Plain text, one datagram per message:
//!
//! ```text
//! PEDIDO_REGISTO_SERVIDOR | REGISTO:<cp>[:<sp>]   -> <ip>:<cp>[:<sp>] | ERRO:<reason>
//! HEARTBEAT | HEARTBEAT:<version>:<cp>:<sp>       -> ACK_HEARTBEAT | ACK_HEARTBEAT:<ROLE>
//! PEDIDO_CLIENTE_SERVIDOR                         -> <ip>:<cp>[:<sp>] | ERRO:<reason>
//! ```
//!
//! The bare forms (`PEDIDO_REGISTO_SERVIDOR`, `HEARTBEAT`) carry no client
//! port; the directory keys those senders by their UDP source port.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use super::errors::{DirectoryError, DirectoryResult};

/// Legacy registration request (no ports)
pub const REGISTER_LEGACY: &str = "PEDIDO_REGISTO_SERVIDOR";
/// Registration request prefix
pub const REGISTER: &str = "REGISTO";
/// Heartbeat request
pub const HEARTBEAT: &str = "HEARTBEAT";
/// Client "who is primary" request
pub const CLIENT_LOOKUP: &str = "PEDIDO_CLIENTE_SERVIDOR";
/// Heartbeat acknowledgement
pub const ACK_HEARTBEAT: &str = "ACK_HEARTBEAT";
/// Error reply prefix
pub const ERROR: &str = "ERRO";

/// Reason sent when the registry is empty
pub const NO_SERVER_AVAILABLE: &str = "no server available";

/// Role reported in a heartbeat acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Primary,
    Standby,
}

impl NodeRole {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Primary => "PRIMARY",
            NodeRole::Standby => "STANDBY",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PRIMARY" => Ok(NodeRole::Primary),
            "STANDBY" => Ok(NodeRole::Standby),
            other => Err(DirectoryError::Malformed(format!("unknown role '{}'", other))),
        }
    }
}

/// Where a server node can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Address as seen by the directory
    pub address: IpAddr,
    /// Port of the client gateway
    pub client_port: u16,
    /// Port of the state-transfer listener, if the node announced one
    pub sync_port: Option<u16>,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(address: IpAddr, client_port: u16, sync_port: Option<u16>) -> Self {
        Self {
            address,
            client_port,
            sync_port,
        }
    }

    /// Socket address of the client gateway.
    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.client_port)
    }

    /// Socket address of the state-transfer listener.
    pub fn sync_addr(&self) -> Option<SocketAddr> {
        self.sync_port.map(|p| SocketAddr::new(self.address, p))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sync_port {
            Some(sp) => write!(f, "{}:{}:{}", self.address, self.client_port, sp),
            None => write!(f, "{}:{}", self.address, self.client_port),
        }
    }
}

impl FromStr for Endpoint {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(DirectoryError::Malformed(format!("bad endpoint '{}'", s)));
        }

        let address = parts[0]
            .parse::<IpAddr>()
            .map_err(|_| DirectoryError::Malformed(format!("bad address in '{}'", s)))?;
        let client_port = parse_port(parts[1])?;
        let sync_port = match parts.get(2) {
            Some(p) => Some(parse_port(p)?),
            None => None,
        };

        Ok(Endpoint::new(address, client_port, sync_port))
    }
}

fn parse_port(s: &str) -> DirectoryResult<u16> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| DirectoryError::Malformed(format!("bad port '{}'", s)))
}

fn parse_version(s: &str) -> DirectoryResult<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| DirectoryError::Malformed(format!("bad version '{}'", s)))
}

/// Ports and version a node reports with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatInfo {
    /// Informational only; the directory does not act on it
    pub version: u64,
    pub client_port: u16,
    pub sync_port: u16,
}

/// A request received by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryRequest {
    /// Node registration; `client_port` is `None` for the legacy form
    Register {
        client_port: Option<u16>,
        sync_port: Option<u16>,
    },
    /// Node heartbeat; `None` for the legacy bare form
    Heartbeat(Option<HeartbeatInfo>),
    /// Client asking who the primary is
    ClientLookup,
}

impl DirectoryRequest {
    /// Parse a datagram payload.
    pub fn parse(message: &str) -> DirectoryResult<Self> {
        let message = message.trim();

        if message == REGISTER_LEGACY {
            return Ok(DirectoryRequest::Register {
                client_port: None,
                sync_port: None,
            });
        }
        if message == CLIENT_LOOKUP {
            return Ok(DirectoryRequest::ClientLookup);
        }
        if message == HEARTBEAT {
            return Ok(DirectoryRequest::Heartbeat(None));
        }

        let mut parts = message.split(':');
        match parts.next() {
            Some(REGISTER) => {
                let rest: Vec<&str> = parts.collect();
                match rest.as_slice() {
                    [cp] => Ok(DirectoryRequest::Register {
                        client_port: Some(parse_port(cp)?),
                        sync_port: None,
                    }),
                    [cp, sp] => Ok(DirectoryRequest::Register {
                        client_port: Some(parse_port(cp)?),
                        sync_port: Some(parse_port(sp)?),
                    }),
                    _ => Err(DirectoryError::Malformed(message.to_string())),
                }
            }
            Some(HEARTBEAT) => {
                let rest: Vec<&str> = parts.collect();
                match rest.as_slice() {
                    [version, cp, sp] => Ok(DirectoryRequest::Heartbeat(Some(HeartbeatInfo {
                        version: parse_version(version)?,
                        client_port: parse_port(cp)?,
                        sync_port: parse_port(sp)?,
                    }))),
                    _ => Err(DirectoryError::Malformed(message.to_string())),
                }
            }
            _ => Err(DirectoryError::Malformed(message.to_string())),
        }
    }

    /// Encode for sending.
    pub fn encode(&self) -> String {
        match self {
            DirectoryRequest::Register {
                client_port: None, ..
            } => REGISTER_LEGACY.to_string(),
            DirectoryRequest::Register {
                client_port: Some(cp),
                sync_port: None,
            } => format!("{}:{}", REGISTER, cp),
            DirectoryRequest::Register {
                client_port: Some(cp),
                sync_port: Some(sp),
            } => format!("{}:{}:{}", REGISTER, cp, sp),
            DirectoryRequest::Heartbeat(None) => HEARTBEAT.to_string(),
            DirectoryRequest::Heartbeat(Some(info)) => format!(
                "{}:{}:{}:{}",
                HEARTBEAT, info.version, info.client_port, info.sync_port
            ),
            DirectoryRequest::ClientLookup => CLIENT_LOOKUP.to_string(),
        }
    }

    /// Whether `response` is a plausible answer to this request.
    pub fn accepts(&self, response: &DirectoryResponse) -> bool {
        match self {
            DirectoryRequest::Heartbeat(_) => {
                matches!(response, DirectoryResponse::HeartbeatAck(_))
            }
            DirectoryRequest::Register { .. } | DirectoryRequest::ClientLookup => matches!(
                response,
                DirectoryResponse::Primary(_) | DirectoryResponse::Error(_)
            ),
        }
    }
}

/// A reply sent by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryResponse {
    /// Current primary
    Primary(Endpoint),
    /// Explicit error, e.g. empty registry
    Error(String),
    /// Heartbeat acknowledgement; role is `None` for the legacy bare form
    HeartbeatAck(Option<NodeRole>),
}

impl DirectoryResponse {
    /// Parse a datagram payload.
    pub fn parse(message: &str) -> DirectoryResult<Self> {
        let message = message.trim();

        if message == ACK_HEARTBEAT {
            return Ok(DirectoryResponse::HeartbeatAck(None));
        }
        if let Some(role) = message
            .strip_prefix(ACK_HEARTBEAT)
            .and_then(|rest| rest.strip_prefix(':'))
        {
            return Ok(DirectoryResponse::HeartbeatAck(Some(role.parse()?)));
        }
        if let Some(rest) = message.strip_prefix(ERROR) {
            let reason = rest.trim_start_matches(':').trim();
            return Ok(DirectoryResponse::Error(reason.to_string()));
        }

        Ok(DirectoryResponse::Primary(message.parse()?))
    }

    /// Encode for sending.
    pub fn encode(&self) -> String {
        match self {
            DirectoryResponse::Primary(endpoint) => endpoint.to_string(),
            DirectoryResponse::Error(reason) => format!("{}:{}", ERROR, reason),
            DirectoryResponse::HeartbeatAck(None) => ACK_HEARTBEAT.to_string(),
            DirectoryResponse::HeartbeatAck(Some(role)) => {
                format!("{}:{}", ACK_HEARTBEAT, role)
            }
        }
    }
}
