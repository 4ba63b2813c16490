//! Error types for the sync layer.
//!
//! Both enums are `Clone` because they travel inside
//! [`SyncEvent`](crate::SyncEvent)s, which are fanned out to every
//! listener.

use duelsync_protocol::{CommandId, PlayerId};
use duelsync_session::SessionError;

use crate::{RejectReason, Ticket};

/// Errors surfaced to whoever submitted a command, or to the match as a
/// whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Publishing failed on every attempt the send policy allows. The
    /// command stays queued and is resent every ack timeout until the
    /// other peer acknowledges it.
    #[error("command {id} not delivered after {attempts} attempts")]
    DeliveryFailed { id: CommandId, attempts: u32 },

    /// The executor refused the command. Nothing was applied.
    #[error("command rejected: {0}")]
    Rejected(RejectReason),

    /// A draft queued while offline claimed a turn that has since passed.
    #[error("draft {ticket} is obsolete: claimed turn {claimed}, match is at turn {current}")]
    Obsolete {
        ticket: Ticket,
        claimed: u64,
        current: u64,
    },

    /// A sequence gap from `issuer` did not fill in time.
    #[error("no command {expected} from {issuer} within the gap timeout")]
    GapTimeout { issuer: PlayerId, expected: u64 },

    /// The link is gone for good.
    #[error("link abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },

    /// The draft was cancelled before it was sent.
    #[error("draft {0} cancelled")]
    Cancelled(Ticket),

    /// A snapshot received during a resync was refused. The resync asks
    /// again after its backoff.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Abandoned { attempts } => Self::Abandoned { attempts },
        }
    }
}

/// Why an inbound snapshot was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Applying it would move the turn index backwards.
    #[error("snapshot at turn {snapshot_turn} is behind local turn {local_turn}")]
    Regression { snapshot_turn: u64, local_turn: u64 },

    /// The snapshot disagrees with itself.
    #[error("inconsistent snapshot: {0}")]
    Inconsistent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_session_abandoned_keeps_attempts() {
        let err: SyncError = SessionError::Abandoned { attempts: 4 }.into();
        assert_eq!(err, SyncError::Abandoned { attempts: 4 });
    }

    #[test]
    fn test_snapshot_error_display_is_transparent() {
        let err: SyncError = SnapshotError::Regression {
            snapshot_turn: 2,
            local_turn: 5,
        }
        .into();
        assert_eq!(err.to_string(), "snapshot at turn 2 is behind local turn 5");
    }
}
