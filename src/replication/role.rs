//! Server Role State Machine
//!
//! - Joining: listeners bound, role not yet known
//! - Primary: sole write authority, sends replication
//! - Standby: applies replication, refuses clients
//! - Terminated: fail-stop after divergence or corruption
//!
//! Roles are only ever learned from the directory. A node never promotes
//! itself; it switches in place when a heartbeat acknowledgement disagrees
//! with its current role.

use std::fmt;

use super::errors::{ReplicationError, ReplicationResult};
use crate::directory::NodeRole;

/// Why a node terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Update arrived more than one version ahead
    VersionGap,

    /// Missed a write, or applied version did not match the announcement
    Divergence,

    /// Replicated command rejected by the local store
    ApplyFailed,

    /// Local store file failed its integrity check
    StoreCorrupted,

    /// Joining standby could not obtain the primary's state
    StateTransferFailed,
}

impl TerminationReason {
    /// Reason name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionGap => "version_gap",
            Self::Divergence => "divergence",
            Self::ApplyFailed => "apply_failed",
            Self::StoreCorrupted => "store_corrupted",
            Self::StateTransferFailed => "state_transfer_failed",
        }
    }
}

/// Role of a server node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerRole {
    /// Registered or registering, waiting for the first acknowledgement
    #[default]
    Joining,

    /// Head of the registry
    Primary,

    /// Any other live node
    Standby,

    /// Stopped after an unrecoverable condition
    Terminated {
        /// Reason for termination
        reason: TerminationReason,
    },
}

impl ServerRole {
    /// Transition to Primary.
    ///
    /// Valid from Joining and Standby (directory promotion); idempotent.
    pub fn become_primary(self) -> ReplicationResult<Self> {
        match self {
            Self::Joining | Self::Standby | Self::Primary => Ok(Self::Primary),
            Self::Terminated { .. } => Err(ReplicationError::terminated(
                "terminated node cannot become primary",
            )),
        }
    }

    /// Transition to Standby.
    ///
    /// Valid from Joining and Primary (directory demotion); idempotent.
    pub fn become_standby(self) -> ReplicationResult<Self> {
        match self {
            Self::Joining | Self::Primary | Self::Standby => Ok(Self::Standby),
            Self::Terminated { .. } => Err(ReplicationError::terminated(
                "terminated node cannot become standby",
            )),
        }
    }

    /// Follow the role assigned by the directory.
    pub fn follow(self, assigned: NodeRole) -> ReplicationResult<Self> {
        match assigned {
            NodeRole::Primary => self.become_primary(),
            NodeRole::Standby => self.become_standby(),
        }
    }

    /// Transition to Terminated. Valid from any state; the first reason
    /// recorded is kept.
    pub fn terminate(self, reason: TerminationReason) -> Self {
        if self.is_terminated() {
            return self;
        }
        Self::Terminated { reason }
    }

    /// Only the primary accepts client writes.
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Only a standby consumes replication traffic.
    pub fn accepts_replication(&self) -> bool {
        matches!(self, Self::Standby)
    }

    /// Check if this is Primary.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Check if terminated.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    /// Get state name for logs.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Joining => "joining",
            Self::Primary => "primary",
            Self::Standby => "standby",
            Self::Terminated { .. } => "terminated",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_joining() {
        let role = ServerRole::default();
        assert_eq!(role, ServerRole::Joining);
        assert!(!role.can_write());
        assert!(!role.accepts_replication());
    }

    #[test]
    fn test_joining_follows_directory() {
        assert!(ServerRole::Joining
            .follow(NodeRole::Primary)
            .unwrap()
            .is_primary());
        assert_eq!(
            ServerRole::Joining.follow(NodeRole::Standby).unwrap(),
            ServerRole::Standby
        );
    }

    #[test]
    fn test_standby_is_promoted_in_place() {
        let role = ServerRole::Standby.become_primary().unwrap();
        assert!(role.can_write());
        assert!(!role.accepts_replication());
    }

    #[test]
    fn test_primary_is_demoted_in_place() {
        let role = ServerRole::Primary.become_standby().unwrap();
        assert!(role.accepts_replication());
        assert!(!role.can_write());
    }

    #[test]
    fn test_transitions_are_idempotent() {
        assert_eq!(ServerRole::Primary.become_primary().unwrap(), ServerRole::Primary);
        assert_eq!(ServerRole::Standby.become_standby().unwrap(), ServerRole::Standby);
    }

    #[test]
    fn test_terminated_cannot_transition() {
        let role = ServerRole::Primary.terminate(TerminationReason::VersionGap);
        assert!(role.is_terminated());

        let err = role.become_primary().unwrap_err();
        assert!(err.is_fatal());
        assert!(role.become_standby().is_err());
        assert!(role.follow(NodeRole::Standby).is_err());
    }

    #[test]
    fn test_first_termination_reason_is_kept() {
        let role = ServerRole::Standby
            .terminate(TerminationReason::VersionGap)
            .terminate(TerminationReason::StoreCorrupted);
        assert_eq!(
            role,
            ServerRole::Terminated {
                reason: TerminationReason::VersionGap
            }
        );
    }

    #[test]
    fn test_any_state_can_terminate() {
        for role in [ServerRole::Joining, ServerRole::Primary, ServerRole::Standby] {
            let stopped = role.terminate(TerminationReason::Divergence);
            assert_eq!(stopped.state_name(), "terminated");
            assert!(!stopped.can_write());
            assert!(!stopped.accepts_replication());
        }
    }
}
