//! Room configuration and state machine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Length of generated room codes.
    pub code_length: usize,

    /// Players per room, counting the local one. A duel is 2.
    pub max_players: usize,

    /// Prefix of the channel id; the channel is `{prefix}/{code}`.
    pub channel_prefix: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            max_players: 2,
            channel_prefix: "duel".to_string(),
        }
    }
}

impl RoomConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - `code_length` into `4..=12`.
    /// - `max_players` at least 2.
    /// - An empty `channel_prefix` falls back to `duel`.
    pub fn validated(mut self) -> Self {
        self.code_length = self.code_length.clamp(4, 12);
        if self.max_players < 2 {
            tracing::warn!(max_players = self.max_players, "a room needs two players; clamping");
            self.max_players = 2;
        }
        if self.channel_prefix.trim().is_empty() {
            self.channel_prefix = "duel".to_string();
        }
        self
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of this peer's room membership.
///
/// ```text
/// Idle ──(create/join)──→ Waiting ──(peer joined)──→ Paired
///                            ▲                          │
///                            └──────(peer left)─────────┘
/// Waiting / Paired ──(leave)──→ Closed ──(create/join)──→ Waiting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    /// Not in any room yet.
    Idle,
    /// In a room, waiting for the opponent.
    Waiting,
    /// Both players present.
    Paired,
    /// Left the room.
    Closed,
}

impl RoomState {
    /// Returns `true` if this peer is currently inside a room.
    pub fn is_in_room(&self) -> bool {
        matches!(self, Self::Waiting | Self::Paired)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Paired => write!(f, "Paired"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
