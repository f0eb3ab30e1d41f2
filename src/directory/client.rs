//! Directory client
//!
//! Used by server nodes (register, heartbeat) and by client sessions
//! (lookup). Each request is retried a bounded number of times, each attempt
//! waiting up to a per-attempt timeout. Datagrams from other sources and
//! answers that do not fit the request are skipped, which also discards late
//! answers to earlier attempts of a different kind.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::errors::{DirectoryError, DirectoryResult};
use super::protocol::{DirectoryRequest, DirectoryResponse, Endpoint, HeartbeatInfo, NodeRole};

const MAX_DATAGRAM: usize = 2048;

/// UDP client bound to an ephemeral port.
#[derive(Debug)]
pub struct DirectoryClient {
    socket: UdpSocket,
    directory: SocketAddr,
}

impl DirectoryClient {
    /// Bind an ephemeral socket for talking to `directory`.
    ///
    /// Endpoints on the wire are IPv4 only, so an IPv6 directory is refused.
    pub async fn connect(directory: SocketAddr) -> DirectoryResult<Self> {
        if !directory.is_ipv4() {
            return Err(DirectoryError::InvalidConfig(format!(
                "directory address {} is not IPv4",
                directory
            )));
        }
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| DirectoryError::Bind {
                addr: local,
                source,
            })?;

        Ok(Self { socket, directory })
    }

    /// Address of the directory this client talks to.
    pub fn directory(&self) -> SocketAddr {
        self.directory
    }

    /// Send `request` and wait for a fitting answer.
    ///
    /// Fails with [`DirectoryError::Timeout`] once every attempt is used up.
    pub async fn request(
        &self,
        request: &DirectoryRequest,
        per_attempt: Duration,
        attempts: u32,
    ) -> DirectoryResult<DirectoryResponse> {
        let attempts = attempts.max(1);
        let payload = request.encode();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 1..=attempts {
            self.socket
                .send_to(payload.as_bytes(), self.directory)
                .await?;
            let deadline = Instant::now() + per_attempt;

            loop {
                let (len, from) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => {
                        debug!(attempt, attempts, request = %payload, "directory attempt timed out");
                        break;
                    }
                };

                if from != self.directory {
                    continue;
                }
                let text = String::from_utf8_lossy(&buf[..len]);
                match DirectoryResponse::parse(&text) {
                    Ok(response) if request.accepts(&response) => return Ok(response),
                    Ok(response) => {
                        debug!(?response, "skipping answer to a different request");
                    }
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable directory answer");
                    }
                }
            }
        }

        Err(DirectoryError::Timeout { attempts })
    }

    /// Register a node; returns the current primary.
    pub async fn register(
        &self,
        client_port: u16,
        sync_port: Option<u16>,
        per_attempt: Duration,
        attempts: u32,
    ) -> DirectoryResult<Endpoint> {
        let request = DirectoryRequest::Register {
            client_port: Some(client_port),
            sync_port,
        };
        let response = self.request(&request, per_attempt, attempts).await?;
        expect_primary(response)
    }

    /// Send one heartbeat; returns the role the directory assigns.
    pub async fn heartbeat(
        &self,
        info: HeartbeatInfo,
        ack_timeout: Duration,
    ) -> DirectoryResult<NodeRole> {
        let request = DirectoryRequest::Heartbeat(Some(info));
        match self.request(&request, ack_timeout, 1).await? {
            DirectoryResponse::HeartbeatAck(Some(role)) => Ok(role),
            other => Err(DirectoryError::UnexpectedResponse(other.encode())),
        }
    }

    /// Ask who the primary is.
    pub async fn lookup_primary(
        &self,
        per_attempt: Duration,
        attempts: u32,
    ) -> DirectoryResult<Endpoint> {
        let response = self
            .request(&DirectoryRequest::ClientLookup, per_attempt, attempts)
            .await?;
        expect_primary(response)
    }
}

fn expect_primary(response: DirectoryResponse) -> DirectoryResult<Endpoint> {
    match response {
        DirectoryResponse::Primary(endpoint) => Ok(endpoint),
        DirectoryResponse::Error(reason) => Err(DirectoryError::NoServerAvailable(reason)),
        other => Err(DirectoryError::UnexpectedResponse(other.encode())),
    }
}
