//! Directory Failover Tests
//!
//! Drives a real directory over loopback with short timeouts:
//! 1. The earliest registered live node is primary
//! 2. A silent node is evicted and the next in line is promoted
//! 3. A node that comes back joins at the tail

use std::net::SocketAddr;
use std::time::Duration;

use tandem::directory::{
    DirectoryClient, DirectoryConfig, DirectoryService, HeartbeatInfo, NodeRole,
};

const ACK: Duration = Duration::from_millis(300);

async fn start_directory() -> SocketAddr {
    let config = DirectoryConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        node_timeout: Duration::from_millis(600),
        sweep_interval: Duration::from_millis(100),
        summary_interval: None,
    };
    let service = DirectoryService::bind(config).await.unwrap();
    let addr = service.local_addr().unwrap();
    tokio::spawn(service.run());
    addr
}

fn info(client_port: u16) -> HeartbeatInfo {
    HeartbeatInfo {
        version: 0,
        client_port,
        sync_port: client_port + 1000,
    }
}

// =============================================================================
// PRIMARY SELECTION
// =============================================================================

/// Test: registration order decides the primary.
#[tokio::test]
async fn test_first_registered_is_primary() {
    let directory = start_directory().await;
    let a = DirectoryClient::connect(directory).await.unwrap();
    let b = DirectoryClient::connect(directory).await.unwrap();

    let primary = a.register(5001, Some(6001), ACK, 3).await.unwrap();
    assert_eq!(primary.client_port, 5001);

    // B learns about A, with A's sync port for state transfer.
    let primary = b.register(5002, Some(6002), ACK, 3).await.unwrap();
    assert_eq!(primary.client_port, 5001);
    assert_eq!(primary.sync_port, Some(6001));

    assert_eq!(a.heartbeat(info(5001), ACK).await.unwrap(), NodeRole::Primary);
    assert_eq!(b.heartbeat(info(5002), ACK).await.unwrap(), NodeRole::Standby);

    let client = DirectoryClient::connect(directory).await.unwrap();
    assert_eq!(client.lookup_primary(ACK, 3).await.unwrap().client_port, 5001);
}

/// Test: an empty directory answers lookups with an error, not silence.
#[tokio::test]
async fn test_empty_directory_reports_no_server() {
    let directory = start_directory().await;
    let client = DirectoryClient::connect(directory).await.unwrap();

    let err = client.lookup_primary(ACK, 1).await.unwrap_err();
    assert!(matches!(
        err,
        tandem::directory::DirectoryError::NoServerAvailable(_)
    ));
}

// =============================================================================
// EVICTION AND PROMOTION
// =============================================================================

/// Test: scenario A/B. A stops heartbeating, B keeps going and is promoted.
#[tokio::test]
async fn test_silent_primary_is_replaced() {
    let directory = start_directory().await;
    let a = DirectoryClient::connect(directory).await.unwrap();
    let b = DirectoryClient::connect(directory).await.unwrap();

    a.register(5001, Some(6001), ACK, 3).await.unwrap();
    b.register(5002, Some(6002), ACK, 3).await.unwrap();

    // Only B heartbeats from here on.
    let mut promoted = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if b.heartbeat(info(5002), ACK).await.unwrap() == NodeRole::Primary {
            promoted = true;
            break;
        }
    }
    assert!(promoted, "standby was never promoted");

    let client = DirectoryClient::connect(directory).await.unwrap();
    assert_eq!(client.lookup_primary(ACK, 3).await.unwrap().client_port, 5002);

    // A comes back: unknown to the directory until it registers again, and
    // then it queues behind B.
    assert_eq!(a.heartbeat(info(5001), ACK).await.unwrap(), NodeRole::Standby);
    let primary = a.register(5001, Some(6001), ACK, 3).await.unwrap();
    assert_eq!(primary.client_port, 5002);
    assert_eq!(a.heartbeat(info(5001), ACK).await.unwrap(), NodeRole::Standby);
}
