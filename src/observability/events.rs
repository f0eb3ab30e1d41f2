//! Observable events for tandem
//!
//! Every lifecycle log line carries an `event` field naming one of these
//! variants, so log consumers can filter on a stable vocabulary instead of
//! free-form messages.

use std::fmt;

/// Observable events across the directory, server nodes and clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Process lifecycle
    /// Process startup begins
    BootStart,
    /// Startup complete, serving
    Serving,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,

    // Directory
    /// A node registered for the first time
    NodeRegistered,
    /// An already-known node re-registered
    NodeRefreshed,
    /// Heartbeat from a node the registry does not know
    HeartbeatUnknownNode,
    /// Node removed by the eviction sweep
    NodeEvicted,
    /// The registry head changed
    PrimaryChanged,
    /// Registry is empty
    NoPrimary,
    /// Periodic directory summary
    DirectorySummary,
    /// Datagram could not be parsed
    MalformedDatagram,

    // Server node
    /// Role decided or changed from a directory answer
    RoleChanged,
    /// Heartbeat ACK not received in time
    HeartbeatLost,
    /// State transfer started
    StateTransferBegin,
    /// State transfer finished and installed
    StateTransferComplete,
    /// State transfer failed (FATAL)
    StateTransferFailed,
    /// Snapshot served to a joining standby
    SnapshotServed,
    /// Write committed locally
    WriteCommit,
    /// Update broadcast to standbys
    UpdateBroadcast,
    /// Replicated update applied on a standby
    UpdateApplied,
    /// Replication divergence detected (FATAL)
    ReplicationDiverged,
    /// Client connection accepted
    ClientConnected,
    /// Client connection rejected because node is not primary
    ClientRejected,
    /// Client session ended
    ClientDisconnected,

    // Client
    /// Primary discovered through the directory
    PrimaryDiscovered,
    /// Directory did not answer after all attempts (FATAL)
    DirectoryUnreachable,
    /// Connection to the primary lost
    ConnectionLost,
    /// Stored credentials replayed after reconnect
    Reauthenticated,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "TANDEM_STARTUP_BEGIN",
            Event::Serving => "TANDEM_SERVING",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::NodeRegistered => "NODE_REGISTERED",
            Event::NodeRefreshed => "NODE_REFRESHED",
            Event::HeartbeatUnknownNode => "HEARTBEAT_UNKNOWN_NODE",
            Event::NodeEvicted => "NODE_EVICTED",
            Event::PrimaryChanged => "PRIMARY_CHANGED",
            Event::NoPrimary => "NO_PRIMARY",
            Event::DirectorySummary => "DIRECTORY_SUMMARY",
            Event::MalformedDatagram => "MALFORMED_DATAGRAM",

            Event::RoleChanged => "ROLE_CHANGED",
            Event::HeartbeatLost => "HEARTBEAT_LOST",
            Event::StateTransferBegin => "STATE_TRANSFER_BEGIN",
            Event::StateTransferComplete => "STATE_TRANSFER_COMPLETE",
            Event::StateTransferFailed => "STATE_TRANSFER_FAILED",
            Event::SnapshotServed => "SNAPSHOT_SERVED",
            Event::WriteCommit => "WRITE_COMMIT",
            Event::UpdateBroadcast => "UPDATE_BROADCAST",
            Event::UpdateApplied => "UPDATE_APPLIED",
            Event::ReplicationDiverged => "REPLICATION_DIVERGED",
            Event::ClientConnected => "CLIENT_CONNECTED",
            Event::ClientRejected => "CLIENT_REJECTED",
            Event::ClientDisconnected => "CLIENT_DISCONNECTED",

            Event::PrimaryDiscovered => "PRIMARY_DISCOVERED",
            Event::DirectoryUnreachable => "DIRECTORY_UNREACHABLE",
            Event::ConnectionLost => "CONNECTION_LOST",
            Event::Reauthenticated => "REAUTHENTICATED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::StateTransferFailed | Event::ReplicationDiverged | Event::DirectoryUnreachable
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
