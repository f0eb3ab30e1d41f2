//! Built-in application: user accounts and an owned key/value space
//!
//! Line protocol, one request line answered by exactly one reply line:
//!
//! ```text
//! REGISTER;<user>;<pass>   -> REGISTERED | ERROR:USER_EXISTS
//! LOGIN;<user>;<pass>      -> LOGIN_OK | LOGIN_FAIL
//! LOGOUT                   -> LOGOUT_OK
//! PUT;<key>;<value>        -> STORED:<version>
//! GET;<key>                -> VALUE:<value> | ERROR:NOT_FOUND
//! DELETE;<key>             -> DELETED:<version> | ERROR:NOT_FOUND
//! VERSION                  -> VERSION:<n>
//! ```
//!
//! Every committed write goes through [`commit`], so it is replicated before
//! the reply is sent, and then announced to logged-in sessions.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

use super::credentials::{hash_password, verify_password};
use crate::replication::{commit, ReplicationSender};
use crate::store::{SharedStore, StoreError, VersionedStore, WriteCommand};

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Logout,
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Version,
}

impl Request {
    /// Parse a request line.
    pub fn parse(line: &str) -> Result<Self, ErrorCode> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match line.split_once(';') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };

        match verb.trim().to_ascii_uppercase().as_str() {
            "REGISTER" => {
                let (username, password) = two_fields(rest)?;
                Ok(Request::Register { username, password })
            }
            "LOGIN" => {
                let (username, password) = two_fields(rest)?;
                Ok(Request::Login { username, password })
            }
            "LOGOUT" => Ok(Request::Logout),
            "PUT" => {
                let (key, value) = two_fields(rest)?;
                Ok(Request::Put { key, value })
            }
            "GET" => Ok(Request::Get {
                key: one_field(rest)?,
            }),
            "DELETE" => Ok(Request::Delete {
                key: one_field(rest)?,
            }),
            "VERSION" => Ok(Request::Version),
            _ => Err(ErrorCode::UnknownVerb),
        }
    }

    /// Whether this request may open a session.
    pub fn opens_session(&self) -> bool {
        matches!(self, Request::Login { .. } | Request::Register { .. })
    }

    /// Verb name for logs; never includes arguments.
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Register { .. } => "REGISTER",
            Request::Login { .. } => "LOGIN",
            Request::Logout => "LOGOUT",
            Request::Put { .. } => "PUT",
            Request::Get { .. } => "GET",
            Request::Delete { .. } => "DELETE",
            Request::Version => "VERSION",
        }
    }
}

fn one_field(rest: Option<&str>) -> Result<String, ErrorCode> {
    match rest {
        Some(field) if !field.is_empty() && !field.contains(';') => Ok(field.to_string()),
        _ => Err(ErrorCode::Args),
    }
}

/// First field up to `;`, second field is the remainder (may contain `;`).
fn two_fields(rest: Option<&str>) -> Result<(String, String), ErrorCode> {
    let (first, second) = rest.and_then(|r| r.split_once(';')).ok_or(ErrorCode::Args)?;
    if first.is_empty() {
        return Err(ErrorCode::Args);
    }
    Ok((first.to_string(), second.to_string()))
}

/// Error codes sent as `ERROR:<CODE>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthRequired,
    PermissionDenied,
    Args,
    UnknownVerb,
    NotFound,
    UserExists,
    Store,
}

impl ErrorCode {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Args => "ARGS",
            ErrorCode::UnknownVerb => "UNKNOWN_VERB",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::UserExists => "USER_EXISTS",
            ErrorCode::Store => "STORE",
        }
    }

    fn from_store(err: &StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ErrorCode::UserExists,
            StoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::Invalid(_) => ErrorCode::Args,
            StoreError::Io { .. } | StoreError::Corrupted(_) | StoreError::Serialization(_) => {
                ErrorCode::Store
            }
        }
    }
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Registered,
    LoginOk,
    LoginFail,
    LogoutOk,
    Stored(u64),
    Value(String),
    Deleted(u64),
    Version(u64),
    Error(ErrorCode),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Registered => f.write_str("REGISTERED"),
            Reply::LoginOk => f.write_str("LOGIN_OK"),
            Reply::LoginFail => f.write_str("LOGIN_FAIL"),
            Reply::LogoutOk => f.write_str("LOGOUT_OK"),
            Reply::Stored(v) => write!(f, "STORED:{}", v),
            Reply::Value(value) => write!(f, "VALUE:{}", value),
            Reply::Deleted(v) => write!(f, "DELETED:{}", v),
            Reply::Version(v) => write!(f, "VERSION:{}", v),
            Reply::Error(code) => write!(f, "ERROR:{}", code.as_str()),
        }
    }
}

/// Asynchronous notification pushed to logged-in sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    DataUpdated,
    UsersUpdated,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::DataUpdated => f.write_str("NOTIF:DATA_UPDATED"),
            Notification::UsersUpdated => f.write_str("NOTIF:USERS_UPDATED"),
        }
    }
}

/// Per-connection state
#[derive(Debug, Default)]
pub struct Session {
    user: Option<String>,
}

impl Session {
    /// Logged-in user, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Check if a user is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// The application as seen by the gateway.
pub struct Application {
    store: SharedStore,
    sender: Arc<ReplicationSender>,
    notifications: broadcast::Sender<Notification>,
    fatal: mpsc::UnboundedSender<StoreError>,
}

impl Application {
    /// Create the application over the node's store and replication sender.
    ///
    /// Store errors that make the node untrustworthy are forwarded on
    /// `fatal`.
    pub fn new(
        store: SharedStore,
        sender: Arc<ReplicationSender>,
        fatal: mpsc::UnboundedSender<StoreError>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            store,
            sender,
            notifications,
            fatal,
        }
    }

    /// Subscribe to notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Execute one request for `session`.
    pub async fn execute(&self, session: &mut Session, request: Request) -> Reply {
        match request {
            Request::Register { username, password } => {
                let command = WriteCommand::CreateUser {
                    username,
                    password_hash: hash_password(&password),
                };
                match self.write(&command).await {
                    Ok(_) => {
                        self.notify(Notification::UsersUpdated);
                        Reply::Registered
                    }
                    Err(code) => Reply::Error(code),
                }
            }

            Request::Login { username, password } => {
                let store = self.store.lock().await;
                let ok = store
                    .user(&username)
                    .map(|u| verify_password(&password, &u.password_hash))
                    .unwrap_or(false);
                drop(store);

                if ok {
                    session.user = Some(username);
                    Reply::LoginOk
                } else {
                    session.user = None;
                    Reply::LoginFail
                }
            }

            Request::Logout => {
                session.user = None;
                Reply::LogoutOk
            }

            Request::Put { key, value } => {
                let Some(owner) = session.user.clone() else {
                    return Reply::Error(ErrorCode::AuthRequired);
                };
                match self.write(&WriteCommand::Put { key, value, owner }).await {
                    Ok(version) => {
                        self.notify(Notification::DataUpdated);
                        Reply::Stored(version)
                    }
                    Err(code) => Reply::Error(code),
                }
            }

            Request::Delete { key } => {
                let Some(owner) = session.user.clone() else {
                    return Reply::Error(ErrorCode::AuthRequired);
                };
                match self.write(&WriteCommand::Delete { key, owner }).await {
                    Ok(version) => {
                        self.notify(Notification::DataUpdated);
                        Reply::Deleted(version)
                    }
                    Err(code) => Reply::Error(code),
                }
            }

            Request::Get { key } => {
                if !session.is_authenticated() {
                    return Reply::Error(ErrorCode::AuthRequired);
                }
                match self.store.lock().await.get(&key) {
                    Some(value) => Reply::Value(value.to_string()),
                    None => Reply::Error(ErrorCode::NotFound),
                }
            }

            Request::Version => {
                if !session.is_authenticated() {
                    return Reply::Error(ErrorCode::AuthRequired);
                }
                Reply::Version(self.store.lock().await.version())
            }
        }
    }

    async fn write(&self, command: &WriteCommand) -> Result<u64, ErrorCode> {
        commit(&self.store, &self.sender, command)
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    error!(op = command.kind(), error = %e, "store failed during commit");
                    let code = ErrorCode::from_store(&e);
                    let _ = self.fatal.send(e);
                    code
                } else {
                    debug!(op = command.kind(), error = %e, "write rejected");
                    ErrorCode::from_store(&e)
                }
            })
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }
}
