//! Replication Consistency Tests
//!
//! Real sockets over loopback, unicast instead of multicast:
//! 1. State transfer leaves the standby byte-identical to the primary
//! 2. Updates committed during a transfer reach the new standby
//! 3. A standby in sync follows the update stream
//! 4. A standby that is behind stops without touching its store
//! 5. A demoted primary starts following the stream

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

use tandem::replication::{
    bind_receiver, commit, fetch_snapshot, run_sync_listener, ReplicationConfig,
    ReplicationErrorKind, ReplicationSender, ServerRole, UpdateReceiver,
};
use tandem::store::{shared, FileStore, SharedStore, VersionedStore, WriteCommand};

fn put(key: &str, value: &str) -> WriteCommand {
    WriteCommand::Put {
        key: key.into(),
        value: value.into(),
        owner: "alice".into(),
    }
}

fn store_at(dir: &TempDir, name: &str, version: u64) -> FileStore {
    let mut store = FileStore::open(dir.path().join(name)).unwrap();
    for i in 1..=version {
        store.apply_write(&put(&format!("k{}", i), "v")).unwrap();
    }
    store
}

/// Receiver on an ephemeral loopback port, acting as a standby.
async fn standby_receiver(store: SharedStore) -> (SocketAddr, UpdateReceiver, watch::Sender<ServerRole>) {
    let config = ReplicationConfig {
        group: "127.0.0.1:9".parse().unwrap(),
        listen: Some("127.0.0.1:0".parse().unwrap()),
        ..ReplicationConfig::default()
    };
    let (role_tx, role_rx) = watch::channel(ServerRole::Standby);
    let receiver = UpdateReceiver::new(bind_receiver(&config).unwrap(), store, role_rx);
    (receiver.local_addr().unwrap(), receiver, role_tx)
}

fn sender_to(target: SocketAddr) -> ReplicationSender {
    let config = ReplicationConfig {
        group: target,
        ..ReplicationConfig::default()
    };
    ReplicationSender::bind(&config, 5001, 6001).unwrap()
}

async fn wait_for_version(store: &SharedStore, version: u64) {
    for _ in 0..50 {
        if store.lock().await.version() == version {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "store stuck at version {}, expected {}",
        store.lock().await.version(),
        version
    );
}

// =============================================================================
// STATE TRANSFER
// =============================================================================

/// Test: a joining standby gets the exact bytes of the primary's store, then
/// follows the stream from there.
#[tokio::test]
async fn test_state_transfer_then_stream() {
    let dir = TempDir::new().unwrap();
    let primary = shared(store_at(&dir, "primary.db", 3));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sync_addr = listener.local_addr().unwrap();
    let (_primary_role, role_rx) = watch::channel(ServerRole::Primary);
    tokio::spawn(run_sync_listener(listener, Arc::clone(&primary), role_rx));

    let standby_path = dir.path().join("standby.db");
    let doc = fetch_snapshot(
        sync_addr,
        &standby_path,
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(doc.version, 3);

    let primary_bytes = std::fs::read(primary.lock().await.path()).unwrap();
    assert_eq!(std::fs::read(&standby_path).unwrap(), primary_bytes);

    let standby = shared(FileStore::open(&standby_path).unwrap());
    let (target, receiver, _role) = standby_receiver(Arc::clone(&standby)).await;
    let receiving = tokio::spawn(receiver.run());

    let sender = sender_to(target);
    let version = commit(&primary, &sender, &put("after", "transfer")).await.unwrap();
    assert_eq!(version, 4);

    wait_for_version(&standby, 4).await;
    assert_eq!(standby.lock().await.get("after"), Some("transfer"));
    assert_eq!(
        standby.lock().await.document(),
        primary.lock().await.document()
    );
    receiving.abort();
}

/// Test: updates committed while a joining standby is still copying state are
/// queued on its bound socket and applied once it starts receiving.
#[tokio::test]
async fn test_updates_during_transfer_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig {
        group: "127.0.0.1:9".parse().unwrap(),
        listen: Some("127.0.0.1:0".parse().unwrap()),
        ..ReplicationConfig::default()
    };
    let socket = bind_receiver(&config).unwrap();
    let target = socket.local_addr().unwrap();

    // Already in the copied state, then committed after the copy.
    let sender = sender_to(target);
    sender.send_update(3, &put("k3", "v")).await.unwrap();
    sender.send_update(4, &put("k4", "v4")).await.unwrap();

    let standby = shared(store_at(&dir, "joined.db", 3));
    let (_role, role_rx) = watch::channel(ServerRole::Standby);
    let task = tokio::spawn(UpdateReceiver::new(socket, Arc::clone(&standby), role_rx).run());

    wait_for_version(&standby, 4).await;
    assert_eq!(standby.lock().await.get("k4"), Some("v4"));
    assert!(!task.is_finished());
    task.abort();
}

// =============================================================================
// VERSION CHECK
// =============================================================================

/// Test: primary at 4 commits version 5; the standby at 4 applies it, the
/// standby at 3 terminates on the gap and keeps its state.
#[tokio::test]
async fn test_update_to_standbys_at_different_versions() {
    let dir = TempDir::new().unwrap();
    let primary = shared(store_at(&dir, "primary.db", 4));
    let in_sync = shared(store_at(&dir, "s1.db", 4));
    let behind = shared(store_at(&dir, "s2.db", 3));

    let (in_sync_addr, in_sync_receiver, _r1) = standby_receiver(Arc::clone(&in_sync)).await;
    let (behind_addr, behind_receiver, _r2) = standby_receiver(Arc::clone(&behind)).await;
    let in_sync_task = tokio::spawn(in_sync_receiver.run());
    let behind_task = tokio::spawn(behind_receiver.run());

    let command = put("k5", "v5");
    let version = commit(&primary, &sender_to(in_sync_addr), &command).await.unwrap();
    assert_eq!(version, 5);
    sender_to(behind_addr).send_update(version, &command).await.unwrap();

    wait_for_version(&in_sync, 5).await;
    assert_eq!(in_sync.lock().await.get("k5"), Some("v5"));

    let outcome = tokio::time::timeout(Duration::from_secs(2), behind_task)
        .await
        .unwrap()
        .unwrap();
    let err = outcome.unwrap_err();
    assert_eq!(err.kind, ReplicationErrorKind::VersionGap);
    assert!(err.is_fatal());
    assert_eq!(behind.lock().await.version(), 3);
    assert_eq!(behind.lock().await.get("k5"), None);

    in_sync_task.abort();
}

/// Test: duplicates and heartbeats at the local version change nothing.
#[tokio::test]
async fn test_duplicate_update_is_ignored() {
    let dir = TempDir::new().unwrap();
    let standby = shared(store_at(&dir, "s.db", 2));
    let (addr, receiver, _role) = standby_receiver(Arc::clone(&standby)).await;
    let task = tokio::spawn(receiver.run());

    let sender = sender_to(addr);
    sender.send_update(2, &put("k2", "again")).await.unwrap();
    sender.send_heartbeat(2).await.unwrap();
    sender.send_update(3, &put("k3", "v3")).await.unwrap();

    wait_for_version(&standby, 3).await;
    assert_eq!(standby.lock().await.get("k2"), Some("v"));
    assert!(!task.is_finished());
    task.abort();
}

/// Test: a heartbeat ahead of the local version means an update was lost.
#[tokio::test]
async fn test_missed_update_detected_by_heartbeat() {
    let dir = TempDir::new().unwrap();
    let standby = shared(store_at(&dir, "s.db", 2));
    let (addr, receiver, _role) = standby_receiver(Arc::clone(&standby)).await;
    let task = tokio::spawn(receiver.run());

    sender_to(addr).send_heartbeat(3).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, ReplicationErrorKind::Divergence);
    assert_eq!(standby.lock().await.version(), 2);
}

/// Test: a primary's receiver ignores replication traffic entirely.
#[tokio::test]
async fn test_primary_ignores_replication() {
    let dir = TempDir::new().unwrap();
    let store = shared(store_at(&dir, "p.db", 1));
    let (addr, receiver, role_tx) = standby_receiver(Arc::clone(&store)).await;
    role_tx.send_replace(ServerRole::Primary);
    let task = tokio::spawn(receiver.run());

    // Would be a fatal gap on a standby.
    sender_to(addr).send_update(9, &put("x", "y")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!task.is_finished());
    assert_eq!(store.lock().await.version(), 1);
    task.abort();
}

/// Test: a demoted primary starts consuming the new primary's stream.
#[tokio::test]
async fn test_demoted_primary_follows_stream() {
    let dir = TempDir::new().unwrap();
    let store = shared(store_at(&dir, "demoted.db", 1));
    let (addr, receiver, role_tx) = standby_receiver(Arc::clone(&store)).await;
    role_tx.send_replace(ServerRole::Primary);
    let task = tokio::spawn(receiver.run());

    let sender = sender_to(addr);
    sender.send_update(2, &put("early", "x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.lock().await.version(), 1);

    role_tx.send_replace(ServerRole::Standby);
    sender.send_update(2, &put("k2", "v2")).await.unwrap();
    wait_for_version(&store, 2).await;
    assert_eq!(store.lock().await.get("k2"), Some("v2"));
    assert_eq!(store.lock().await.get("early"), None);
    task.abort();
}
