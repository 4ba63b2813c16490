//! Identity types shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PlayerId
// ---------------------------------------------------------------------------

/// A unique identifier for a player (the issuer of commands).
///
/// Newtype wrapper so a `PlayerId` can't be confused with a sequence number
/// or a turn index even though all three are `u64` underneath.
///
/// `#[serde(transparent)]` serializes `PlayerId(42)` as plain `42`.
/// `Ord` is derived because player ids key the `BTreeMap` high-water marks
/// inside [`GameState`](crate::GameState), which must iterate in a stable
/// order on every peer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

/// `tracing::info!(%player_id, "joined")` prints `P-42`.
impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CommandId
// ---------------------------------------------------------------------------

/// Globally unique command identifier: the issuer plus that issuer's
/// monotonic sequence number.
///
/// Sequence numbers start at 1 and are never reused for the lifetime of a
/// session, so `(issuer, seq)` identifies exactly one command. Receivers use
/// it for de-duplication and per-issuer ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CommandId {
    /// Who authored the command.
    pub issuer: PlayerId,
    /// Position in the issuer's command stream (1-based).
    pub seq: u64,
}

impl CommandId {
    /// Creates a new `CommandId`.
    pub fn new(issuer: PlayerId, seq: u64) -> Self {
        Self { issuer, seq }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.issuer, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_player_id_display() {
        assert_eq!(PlayerId(7).to_string(), "P-7");
    }

    #[test]
    fn test_command_id_display_includes_issuer_and_seq() {
        assert_eq!(CommandId::new(PlayerId(1), 3).to_string(), "P-1#3");
    }

    #[test]
    fn test_command_id_orders_by_issuer_then_seq() {
        let a = CommandId::new(PlayerId(1), 9);
        let b = CommandId::new(PlayerId(2), 1);
        let c = CommandId::new(PlayerId(2), 2);
        assert!(a < b);
        assert!(b < c);
    }
}
