//! The per-room connection record.

use duelsync_protocol::PlayerId;
use serde::{Deserialize, Serialize};

use crate::LinkState;

/// Coarse link status, as shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl From<LinkState> for ChannelStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Connected => Self::Connected,
            LinkState::Reconnecting { .. } | LinkState::Resyncing => Self::Connecting,
            LinkState::Disconnected | LinkState::Abandoned => Self::Disconnected,
        }
    }
}

/// One peer's view of its link to a room.
///
/// Created on room join, dropped on leave. Reconnection changes
/// `status` and never the identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSession {
    /// Channel id of the room, e.g. `duel/K7M2QX`.
    pub room: String,
    pub local: PlayerId,
    /// The other player, once presence has told us who it is.
    pub remote: Option<PlayerId>,
    pub status: ChannelStatus,
    /// Turn index reached by the last completed sync (live apply or
    /// snapshot).
    pub last_synced_turn_index: u64,
}

impl ConnectionSession {
    pub fn new(room: impl Into<String>, local: PlayerId) -> Self {
        Self {
            room: room.into(),
            local,
            remote: None,
            status: ChannelStatus::Connecting,
            last_synced_turn_index: 0,
        }
    }

    /// Records the remote player. The first one seen sticks; a different
    /// id later is ignored and logged.
    pub fn set_remote(&mut self, peer: PlayerId) {
        match self.remote {
            None => {
                self.remote = Some(peer);
                tracing::info!(local = %self.local, remote = %peer, room = %self.room, "remote peer identified");
            }
            Some(known) if known != peer => {
                tracing::warn!(known = %known, other = %peer, "ignoring third peer on room channel");
            }
            Some(_) => {}
        }
    }

    /// Advances `last_synced_turn_index`. Never moves it backwards.
    pub fn record_sync(&mut self, turn_index: u64) {
        self.last_synced_turn_index = self.last_synced_turn_index.max(turn_index);
    }

    pub fn is_connected(&self) -> bool {
        self.status == ChannelStatus::Connected
    }
}
