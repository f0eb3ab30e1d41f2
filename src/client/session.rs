//! Client session
//!
//! Wraps one TCP connection to the current primary and survives losing it:
//! - One request line gets exactly one reply line; `NOTIF:` lines that
//!   arrive in between are queued, never returned as a reply
//! - On connection loss the session rediscovers, reconnects and replays the
//!   stored login line before handing control back
//! - The request in flight is not re-sent; the caller gets
//!   [`ClientError::Interrupted`] and may resubmit
//! - Only a refused login drops the stored credentials; losing the new
//!   connection during the replay keeps them for the next attempt
//!
//! Reads time out only until the session is authenticated.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use super::discovery::{discover, rediscover};
use super::errors::{ClientError, ClientResult};
use crate::directory::{DirectoryClient, Endpoint};
use crate::observability::Event;

/// Prefix of asynchronous notification lines
pub const NOTIFICATION_PREFIX: &str = "NOTIF:";

const LOGIN_OK: &str = "LOGIN_OK";
const LOGIN_FAIL: &str = "LOGIN_FAIL";
const LOGOUT_OK: &str = "LOGOUT_OK";
const AUTH_REQUIRED: &str = "ERROR:AUTH_REQUIRED";

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// The server accepted a session-opening first line
    opened: bool,
}

impl Connection {
    async fn open(addr: SocketAddr, config: &ClientConfig) -> ClientResult<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr))?
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            opened: false,
        })
    }
}

/// Why a line could not be exchanged
enum LinkFailure {
    Closed,
    TimedOut,
    Io(std::io::Error),
}

impl LinkFailure {
    fn describe(&self) -> String {
        match self {
            LinkFailure::Closed => "closed by server".into(),
            LinkFailure::TimedOut => "read timed out".into(),
            LinkFailure::Io(e) => e.to_string(),
        }
    }
}

/// A client connected to the current primary.
pub struct ClientSession {
    config: ClientConfig,
    directory: DirectoryClient,
    endpoint: Endpoint,
    conn: Option<Connection>,
    /// Stored LOGIN line, replayed after a reconnect
    credentials: Option<String>,
    authenticated: bool,
    /// Set after the previous connection failed; the next connect rediscovers
    needs_discovery: bool,
    aborted: bool,
    notifications: VecDeque<String>,
}

impl ClientSession {
    /// Discover the primary and connect to it.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let directory = DirectoryClient::connect(config.directory)
            .await
            .map_err(ClientError::Directory)?;
        let endpoint = discover(&directory, &config).await?;
        let conn = Connection::open(endpoint.client_addr(), &config).await?;

        Ok(Self {
            config,
            directory,
            endpoint,
            conn: Some(conn),
            credentials: None,
            authenticated: false,
            needs_discovery: false,
            aborted: false,
            notifications: VecDeque::new(),
        })
    }

    /// Primary this session talks to.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Check if the session is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Drain queued notifications.
    pub fn take_notifications(&mut self) -> Vec<String> {
        self.notifications.drain(..).collect()
    }

    /// Send one request line and return its reply line.
    pub async fn request(&mut self, line: &str) -> ClientResult<String> {
        if self.aborted {
            return Err(ClientError::Closed);
        }
        if line.contains('\n') || line.contains('\r') {
            return Err(ClientError::InvalidRequest);
        }
        if self.conn.is_none() {
            self.reconnect().await?;
        }

        match self.exchange(line).await {
            Ok(reply) => {
                self.track(line, &reply);
                Ok(reply)
            }
            Err(failure) => {
                warn!(
                    event = %Event::ConnectionLost,
                    primary = %self.endpoint,
                    reason = %failure.describe(),
                    "lost connection to primary"
                );
                self.conn = None;
                self.needs_discovery = true;
                self.reconnect().await?;
                Err(ClientError::Interrupted)
            }
        }
    }

    /// Log in; credentials are kept for replay after a reconnect.
    pub async fn login(&mut self, username: &str, password: &str) -> ClientResult<bool> {
        let reply = self
            .request(&format!("LOGIN;{};{}", username, password))
            .await?;
        Ok(reply == LOGIN_OK)
    }

    /// Log out and forget the stored credentials.
    pub async fn logout(&mut self) -> ClientResult<()> {
        let result = self.request("LOGOUT").await.map(|_| ());
        self.credentials = None;
        self.authenticated = false;
        result
    }

    async fn exchange(&mut self, line: &str) -> Result<String, LinkFailure> {
        let read_timeout = (!self.authenticated).then_some(self.config.read_timeout);
        let conn = self.conn.as_mut().ok_or(LinkFailure::Closed)?;

        conn.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(LinkFailure::Io)?;

        loop {
            let next = match read_timeout {
                Some(limit) => timeout(limit, conn.lines.next_line())
                    .await
                    .map_err(|_| LinkFailure::TimedOut)?,
                None => conn.lines.next_line().await,
            };
            match next {
                Ok(Some(reply)) if reply.starts_with(NOTIFICATION_PREFIX) => {
                    debug!(notification = %reply, "notification queued");
                    self.notifications.push_back(reply);
                }
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => return Err(LinkFailure::Closed),
                Err(e) => return Err(LinkFailure::Io(e)),
            }
        }
    }

    /// Update authentication state from a completed exchange.
    fn track(&mut self, line: &str, reply: &str) {
        let verb = line.split(';').next().unwrap_or("").trim().to_ascii_uppercase();
        let first_line = self.conn.as_ref().map(|c| !c.opened).unwrap_or(false);

        match (verb.as_str(), reply) {
            ("LOGIN", LOGIN_OK) => {
                self.credentials = Some(line.to_string());
                self.authenticated = true;
            }
            ("LOGIN", LOGIN_FAIL) => {
                self.credentials = None;
                self.authenticated = false;
            }
            ("LOGOUT", LOGOUT_OK) => {
                self.credentials = None;
                self.authenticated = false;
            }
            _ => {}
        }

        if first_line {
            // The server closes a connection whose first line did not open a
            // session; reconnect to the same primary next time.
            if reply == AUTH_REQUIRED || (verb == "LOGIN" && reply == LOGIN_FAIL) {
                self.conn = None;
            } else if let Some(conn) = self.conn.as_mut() {
                conn.opened = true;
            }
        }
    }

    /// Reconnect, rediscovering first if the last connection failed, and
    /// replay the stored login.
    async fn reconnect(&mut self) -> ClientResult<()> {
        if self.needs_discovery {
            match rediscover(&self.directory, &self.config, &self.endpoint).await {
                Ok(endpoint) => self.endpoint = endpoint,
                Err(e) => {
                    if e.is_permanent() {
                        self.aborted = true;
                    }
                    return Err(e);
                }
            }
        }

        let conn = Connection::open(self.endpoint.client_addr(), &self.config).await?;
        self.conn = Some(conn);
        self.needs_discovery = false;
        self.authenticated = false;
        info!(primary = %self.endpoint, "connected to primary");

        let Some(login) = self.credentials.clone() else {
            return Ok(());
        };
        match self.exchange(&login).await {
            Ok(reply) if reply == LOGIN_OK => {
                self.track(&login, &reply);
                info!(event = %Event::Reauthenticated, primary = %self.endpoint, "session restored");
                Ok(())
            }
            Ok(reply) => {
                self.track(&login, &reply);
                self.credentials = None;
                warn!(primary = %self.endpoint, reply = %reply, "stored login refused");
                Err(ClientError::ReauthenticationFailed)
            }
            Err(failure) => {
                // No answer is not a refusal: keep the login for the next
                // primary the directory names.
                warn!(
                    event = %Event::ConnectionLost,
                    primary = %self.endpoint,
                    reason = %failure.describe(),
                    "connection lost while restoring session"
                );
                self.conn = None;
                self.needs_discovery = true;
                Err(ClientError::Interrupted)
            }
        }
    }
}
