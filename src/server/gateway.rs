//! Client gateway
//!
//! TCP accept loop plus one task per client session. Only the primary serves
//! clients: while the node is anything else, new connections are closed on
//! accept and open sessions are closed as soon as the role changes, which
//! sends clients back to the directory.
//!
//! Session rules:
//! - the first line must be LOGIN or REGISTER, within the pre-auth timeout
//! - a failed first LOGIN closes the connection
//! - after that, no read timeout
//! - logged-in sessions also receive `NOTIF:` lines

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::application::{Application, ErrorCode, Reply, Request, Session};
use crate::observability::Event;
use crate::replication::ServerRole;

/// Accept clients for the life of the node.
pub async fn run_gateway(
    listener: TcpListener,
    app: Arc<Application>,
    role: watch::Receiver<ServerRole>,
    pre_auth_timeout: Duration,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "client accept failed");
                continue;
            }
        };

        let current = *role.borrow();
        if !current.can_write() {
            debug!(event = %Event::ClientRejected, peer = %peer, role = %current, "closing client connection");
            drop(stream);
            continue;
        }

        let app = Arc::clone(&app);
        let role = role.clone();
        tokio::spawn(async move {
            let session_id = Uuid::new_v4();
            info!(event = %Event::ClientConnected, peer = %peer, session = %session_id, "client connected");
            let reason = serve_client(stream, app, role, pre_auth_timeout).await;
            info!(
                event = %Event::ClientDisconnected,
                peer = %peer,
                session = %session_id,
                reason = reason.as_str(),
                "client disconnected"
            );
        });
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    AuthTimeout,
    AuthRequired,
    LoginFailed,
    NoLongerPrimary,
    Io,
}

impl SessionEnd {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::AuthTimeout => "auth_timeout",
            SessionEnd::AuthRequired => "auth_required",
            SessionEnd::LoginFailed => "login_failed",
            SessionEnd::NoLongerPrimary => "no_longer_primary",
            SessionEnd::Io => "io_error",
        }
    }
}

/// Serve one client session to completion.
pub async fn serve_client(
    stream: TcpStream,
    app: Arc<Application>,
    mut role: watch::Receiver<ServerRole>,
    pre_auth_timeout: Duration,
) -> SessionEnd {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut notifications = app.subscribe();
    let mut session = Session::default();

    // First line: authentication, under a timeout.
    let first = match timeout(pre_auth_timeout, lines.next_line()).await {
        Err(_) => return SessionEnd::AuthTimeout,
        Ok(Err(_)) => return SessionEnd::Io,
        Ok(Ok(None)) => return SessionEnd::ClientClosed,
        Ok(Ok(Some(line))) => line,
    };

    let request = match Request::parse(&first) {
        Ok(request) if request.opens_session() => request,
        _ => {
            let _ = send_line(&mut writer, &Reply::Error(ErrorCode::AuthRequired)).await;
            return SessionEnd::AuthRequired;
        }
    };
    let is_login = matches!(request, Request::Login { .. });
    let reply = app.execute(&mut session, request).await;
    if send_line(&mut writer, &reply).await.is_err() {
        return SessionEnd::Io;
    }
    if is_login && !session.is_authenticated() {
        return SessionEnd::LoginFailed;
    }

    loop {
        // Pending notifications go out before the next reply.
        tokio::select! {
            biased;

            notification = notifications.recv() => {
                match notification {
                    Ok(notification) if session.is_authenticated() => {
                        if send_line(&mut writer, &notification).await.is_err() {
                            return SessionEnd::Io;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session lagged behind notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => return SessionEnd::NoLongerPrimary,
                }
            }

            changed = role.changed() => {
                if changed.is_err() || !role.borrow().can_write() {
                    return SessionEnd::NoLongerPrimary;
                }
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return SessionEnd::ClientClosed,
                    Err(_) => return SessionEnd::Io,
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match Request::parse(&line) {
                    Ok(request) => {
                        debug!(peer = ?peer, verb = request.verb(), "request");
                        app.execute(&mut session, request).await
                    }
                    Err(code) => Reply::Error(code),
                };
                if send_line(&mut writer, &reply).await.is_err() {
                    return SessionEnd::Io;
                }
            }
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &impl std::fmt::Display) -> std::io::Result<()> {
    writer.write_all(format!("{}\n", line).as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{ReplicationConfig, ReplicationSender};
    use crate::store::{shared, FileStore};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        _sink: UdpSocket,
        app: Arc<Application>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = shared(FileStore::open(dir.path().join("gw.db")).unwrap());
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ReplicationConfig {
            group: sink.local_addr().unwrap(),
            ..ReplicationConfig::default()
        };
        let sender = Arc::new(ReplicationSender::bind(&config, 5001, 6001).unwrap());
        let (fatal, _) = mpsc::unbounded_channel();
        Fixture {
            _dir: dir,
            _sink: sink,
            app: Arc::new(Application::new(store, sender, fatal)),
        }
    }

    /// Client and server ends of one loopback connection.
    async fn connected() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn read_to_close(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_standby_closes_new_connections() {
        let fx = fixture().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_role, role_rx) = watch::channel(ServerRole::Standby);
        let gateway = tokio::spawn(run_gateway(
            listener,
            Arc::clone(&fx.app),
            role_rx,
            Duration::from_secs(5),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(read_to_close(&mut client).await, "");
        gateway.abort();
    }

    #[tokio::test]
    async fn test_demotion_closes_open_session() {
        let fx = fixture().await;
        let (role_tx, role_rx) = watch::channel(ServerRole::Primary);
        let (mut client, server) = connected().await;
        let session = tokio::spawn(serve_client(
            server,
            Arc::clone(&fx.app),
            role_rx,
            Duration::from_secs(5),
        ));

        client.write_all(b"REGISTER;alice;pw\n").await.unwrap();
        let mut reply = [0u8; 11];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"REGISTERED\n");

        role_tx.send_replace(ServerRole::Standby);
        let end = timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::NoLongerPrimary);
        assert_eq!(read_to_close(&mut client).await, "");
    }

    #[tokio::test]
    async fn test_silent_client_hits_pre_auth_timeout() {
        let fx = fixture().await;
        let (_role, role_rx) = watch::channel(ServerRole::Primary);
        let (mut client, server) = connected().await;

        let end = serve_client(server, fx.app, role_rx, Duration::from_millis(100)).await;
        assert_eq!(end, SessionEnd::AuthTimeout);
        assert_eq!(read_to_close(&mut client).await, "");
    }

    #[tokio::test]
    async fn test_first_line_must_open_session() {
        let fx = fixture().await;
        let (_role, role_rx) = watch::channel(ServerRole::Primary);
        let (mut client, server) = connected().await;

        client.write_all(b"GET;k\n").await.unwrap();
        let end = serve_client(server, fx.app, role_rx, Duration::from_secs(5)).await;
        assert_eq!(end, SessionEnd::AuthRequired);
        assert_eq!(read_to_close(&mut client).await, "ERROR:AUTH_REQUIRED\n");
    }

    #[tokio::test]
    async fn test_failed_first_login_closes() {
        let fx = fixture().await;
        let (_role, role_rx) = watch::channel(ServerRole::Primary);
        let (mut client, server) = connected().await;

        client.write_all(b"LOGIN;nobody;pw\n").await.unwrap();
        let end = serve_client(server, fx.app, role_rx, Duration::from_secs(5)).await;
        assert_eq!(end, SessionEnd::LoginFailed);
        assert_eq!(read_to_close(&mut client).await, "LOGIN_FAIL\n");
    }
}
