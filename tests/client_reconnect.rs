//! Client Reconnect Tests
//!
//! Scripted directory and primaries on loopback:
//! 1. Login, drop, reconnect to a different endpoint, replayed login
//! 2. Replayed login refused: the session is no longer authenticated
//! 3. Replay cut off by a dropped connection keeps the stored login
//! 4. The request in flight is never re-sent

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};

use tandem::client::{ClientConfig, ClientError, ClientSession};

/// Answers lookups with each endpoint in turn, repeating the last one.
async fn scripted_directory(endpoints: Vec<SocketAddr>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let mut i = 0;
        loop {
            let (_, from) = socket.recv_from(&mut buf).await.unwrap();
            let endpoint = endpoints[i.min(endpoints.len() - 1)];
            i += 1;
            socket
                .send_to(endpoint.to_string().as_bytes(), from)
                .await
                .unwrap();
        }
    });
    addr
}

/// A primary that records every line it gets and answers with `reply`.
/// After `close_after` lines it drops the connection without answering.
async fn fake_primary(
    reply: fn(&str) -> String,
    close_after: Option<usize>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.lock().push(line.clone());
            if Some(log.lock().len()) == close_after {
                return;
            }
            let answer = format!("{}\n", reply(&line));
            if write.write_all(answer.as_bytes()).await.is_err() {
                return;
            }
        }
    });
    (addr, seen)
}

/// A node that accepts connections and drops them straight away, like one
/// the directory promoted before it learned its new role.
async fn dropping_primary() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    addr
}

fn accepting(line: &str) -> String {
    if line.starts_with("LOGIN") {
        "LOGIN_OK".into()
    } else {
        "VALUE:x".into()
    }
}

fn refusing(line: &str) -> String {
    if line.starts_with("LOGIN") {
        "LOGIN_FAIL".into()
    } else {
        "ERROR:AUTH_REQUIRED".into()
    }
}

fn config(directory: SocketAddr) -> ClientConfig {
    ClientConfig {
        directory,
        discovery_timeout: Duration::from_millis(300),
        discovery_attempts: 2,
        read_timeout: Duration::from_secs(2),
        cooldown: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

// =============================================================================
// FAILOVER
// =============================================================================

/// Test: login, drop, reconnect to the new primary, login replayed.
#[tokio::test]
async fn test_reconnect_replays_login() {
    // First primary answers the login, then dies on the next request.
    let (first, first_seen) = fake_primary(accepting, Some(2)).await;
    let (second, second_seen) = fake_primary(accepting, None).await;
    let directory = scripted_directory(vec![first, second]).await;

    let mut session = ClientSession::connect(config(directory)).await.unwrap();
    assert!(session.login("alice", "pw").await.unwrap());

    let err = session.request("GET;k").await.unwrap_err();
    assert!(matches!(err, ClientError::Interrupted));
    assert_eq!(session.endpoint().client_addr(), second);
    assert!(session.is_authenticated());

    // Interrupted request not re-sent; only the login was replayed.
    assert_eq!(*second_seen.lock(), vec!["LOGIN;alice;pw".to_string()]);
    assert_eq!(first_seen.lock().len(), 2);

    assert_eq!(session.request("GET;k").await.unwrap(), "VALUE:x");
}

/// Test: the new primary refuses the stored login.
#[tokio::test]
async fn test_refused_reauthentication() {
    let (first, _) = fake_primary(accepting, Some(2)).await;
    let (second, second_seen) = fake_primary(refusing, None).await;
    let directory = scripted_directory(vec![first, second]).await;

    let mut session = ClientSession::connect(config(directory)).await.unwrap();
    assert!(session.login("alice", "pw").await.unwrap());

    let err = session.request("GET;k").await.unwrap_err();
    assert!(matches!(err, ClientError::ReauthenticationFailed));
    assert!(!err.is_permanent());
    assert!(!session.is_authenticated());
    assert_eq!(second_seen.lock().len(), 1);
}

/// Test: the connection drops during the login replay; the stored login
/// survives and is replayed on the next primary.
#[tokio::test]
async fn test_replay_interrupted_by_connection_loss() {
    let (first, _) = fake_primary(accepting, Some(2)).await;
    let flapping = dropping_primary().await;
    let (third, third_seen) = fake_primary(accepting, None).await;
    let directory = scripted_directory(vec![first, flapping, third]).await;

    let mut session = ClientSession::connect(config(directory)).await.unwrap();
    assert!(session.login("alice", "pw").await.unwrap());

    let err = session.request("GET;k").await.unwrap_err();
    assert!(matches!(err, ClientError::Interrupted));
    assert_eq!(session.endpoint().client_addr(), flapping);
    assert!(!session.is_authenticated());

    // Next request rediscovers, replays the login, then goes through.
    assert_eq!(session.request("GET;k").await.unwrap(), "VALUE:x");
    assert_eq!(session.endpoint().client_addr(), third);
    assert!(session.is_authenticated());
    assert_eq!(
        *third_seen.lock(),
        vec!["LOGIN;alice;pw".to_string(), "GET;k".to_string()]
    );
}

/// Test: without a login there is nothing to replay.
#[tokio::test]
async fn test_reconnect_without_login() {
    let (first, _) = fake_primary(accepting, Some(1)).await;
    let (second, second_seen) = fake_primary(accepting, None).await;
    let directory = scripted_directory(vec![first, second]).await;

    let mut session = ClientSession::connect(config(directory)).await.unwrap();
    let err = session.request("REGISTER;alice;pw").await.unwrap_err();
    assert!(matches!(err, ClientError::Interrupted));
    assert!(second_seen.lock().is_empty());
    assert!(!session.is_authenticated());
}

// =============================================================================
// GIVING UP
// =============================================================================

/// Test: the directory keeps naming the dead primary across the cooldown.
#[tokio::test]
async fn test_same_dead_endpoint_twice_aborts() {
    let (first, _) = fake_primary(accepting, Some(1)).await;
    let directory = scripted_directory(vec![first]).await;

    let mut session = ClientSession::connect(config(directory)).await.unwrap();
    let err = session.request("LOGIN;alice;pw").await.unwrap_err();
    assert!(matches!(err, ClientError::PrimaryUnavailable(_)));
    assert!(matches!(
        session.request("VERSION").await,
        Err(ClientError::Closed)
    ));
}

/// Test: an unreachable directory fails the initial connect.
#[tokio::test]
async fn test_unreachable_directory() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let result = ClientSession::connect(config(silent.local_addr().unwrap())).await;
    assert!(matches!(
        result,
        Err(ClientError::DirectoryUnreachable { attempts: 2, .. })
    ));
}
