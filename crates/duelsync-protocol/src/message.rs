//! Peer-to-peer messages.
//!
//! Everything one peer publishes on the room channel is an [`Envelope`]
//! wrapping one [`SyncMessage`]. The relay never looks inside; it only
//! forwards the encoded bytes.

use serde::{Deserialize, Serialize};

use crate::{GameCommand, PlayerId, Snapshot};

/// What one peer tells the other.
///
/// Internally tagged, so a command travels as
/// `{"type": "command", "id": {...}, "turn_index": 3, ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage<B> {
    /// Presence announcement. Sent after every (re)subscribe.
    /// `reply_requested` asks the other side to answer with its own
    /// `Hello`, so two peers that joined in either order learn about each
    /// other.
    Hello { player: PlayerId, reply_requested: bool },

    /// Leaving the room for good.
    Goodbye { player: PlayerId },

    /// One locally authored command, already applied by its issuer.
    Command(GameCommand),

    /// Cumulative acknowledgement: every command from `issuer` up to and
    /// including `through` has been consumed.
    Ack { issuer: PlayerId, through: u64 },

    /// "Send me your full state." `turn_index` is the requester's current
    /// turn, for logging on the answering side.
    SnapshotRequest { requester: PlayerId, turn_index: u64 },

    /// Answer to a `SnapshotRequest`, addressed to one peer.
    Snapshot { to: PlayerId, snapshot: Snapshot<B> },
}

impl<B> SyncMessage<B> {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Goodbye { .. } => "goodbye",
            Self::Command(_) => "command",
            Self::Ack { .. } => "ack",
            Self::SnapshotRequest { .. } => "snapshot_request",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}

/// The unit published on a room channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<B> {
    /// The publishing peer. Receivers drop their own echoes by this field.
    pub from: PlayerId,
    /// Sender's wall clock in milliseconds. Diagnostic only.
    pub sent_at: u64,
    pub message: SyncMessage<B>,
}

impl<B> Envelope<B> {
    pub fn new(from: PlayerId, sent_at: u64, message: SyncMessage<B>) -> Self {
        Self {
            from,
            sent_at,
            message,
        }
    }
}
