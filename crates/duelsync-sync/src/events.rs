//! What the sync layer reports to the game.

use std::fmt;
use std::sync::Arc;

use duelsync_protocol::{CommandId, GameState, PlayerId};
use duelsync_session::{ChannelStatus, LinkState};
use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Handle for one local submission, issued before a sequence number is.
///
/// A submission made while offline is a draft with no [`CommandId`] yet;
/// the ticket is how later events refer back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

/// Immediate answer to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Sealed and applied locally; broadcast is queued.
    Applied {
        ticket: Ticket,
        id: CommandId,
        turn_index: u64,
    },
    /// Held as a draft until the link is back. The outcome arrives later
    /// as [`SyncEvent::Accepted`] or [`SyncEvent::Refused`].
    Queued { ticket: Ticket },
}

impl Receipt {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Applied { ticket, .. } | Self::Queued { ticket } => *ticket,
        }
    }
}

/// Everything a listener can observe, in the order it happened.
#[derive(Debug, Clone)]
pub enum SyncEvent<B> {
    /// The state was replaced, by an apply or by a snapshot. Exactly one
    /// per replacement.
    StateChanged {
        turn_index: u64,
        state: Arc<GameState<B>>,
    },

    /// Coarse link status for the UI.
    ConnectionStatus(ChannelStatus),

    /// Fine-grained link state.
    Link(LinkState),

    /// The other player came or went.
    Presence { peer: PlayerId, present: bool },

    /// A draft was sealed and applied after the link came back.
    Accepted { ticket: Ticket, id: CommandId },

    /// The other peer acknowledged a local command.
    Delivered { id: CommandId },

    /// A local submission did not make it, or the link was abandoned.
    /// `ticket` is `None` for failures that concern the whole match.
    Refused {
        ticket: Option<Ticket>,
        error: SyncError,
    },
}

impl<B> SyncEvent<B> {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::ConnectionStatus(_) => "connection_status",
            Self::Link(_) => "link",
            Self::Presence { .. } => "presence",
            Self::Accepted { .. } => "accepted",
            Self::Delivered { .. } => "delivered",
            Self::Refused { .. } => "refused",
        }
    }
}
