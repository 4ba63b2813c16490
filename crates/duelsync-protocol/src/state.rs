//! Shared match state and full-state checkpoints.
//!
//! The board itself is generic: the rules engine picks the type. The
//! protocol only fixes the envelope around it (turn counter, phase, and the
//! per-issuer high-water marks used for de-duplication).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PlayerId, ProtocolError};

// ---------------------------------------------------------------------------
// MatchPhase
// ---------------------------------------------------------------------------

/// Where the match is in its lifecycle.
///
/// Derived from the board by the rules engine after every apply, so both
/// peers always agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MatchPhase {
    /// Not started: waiting for both players.
    #[default]
    Lobby,
    /// In progress. Commands are accepted.
    Active,
    /// Over. `winner` is `None` for a draw.
    Finished { winner: Option<PlayerId> },
}

impl MatchPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The authoritative match state on one peer.
///
/// A `GameState` is never edited in place once published: the executor
/// builds the next value and swaps the `Arc` that holds it. Everything
/// downstream reads `Arc<GameState<B>>` clones.
///
/// `last_applied` is a `BTreeMap` (not a `HashMap`) so serialization order
/// is deterministic and two peers with equal state encode equal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState<B> {
    pub turn_index: u64,
    pub phase: MatchPhase,
    pub board: B,
    /// Highest sequence number consumed from each issuer.
    pub last_applied: BTreeMap<PlayerId, u64>,
}

impl<B> GameState<B> {
    /// A fresh state at turn 0 with no commands consumed.
    pub fn new(board: B, phase: MatchPhase) -> Self {
        Self {
            turn_index: 0,
            phase,
            board,
            last_applied: BTreeMap::new(),
        }
    }

    /// High-water mark for `issuer`; 0 when nothing has been consumed yet.
    pub fn last_applied_for(&self, issuer: PlayerId) -> u64 {
        self.last_applied.get(&issuer).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable full-state checkpoint.
///
/// `turn_index` and `last_applied` are duplicated at the top level so a
/// receiver can decide whether to accept a snapshot without looking inside
/// the board. [`Snapshot::verify`] checks that the copies agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<B> {
    pub turn_index: u64,
    pub state: GameState<B>,
    pub last_applied: BTreeMap<PlayerId, u64>,
}

impl<B: Clone> Snapshot<B> {
    /// Copies `state` into a new snapshot.
    pub fn capture(state: &GameState<B>) -> Self {
        Self {
            turn_index: state.turn_index,
            state: state.clone(),
            last_applied: state.last_applied.clone(),
        }
    }
}

impl<B> Snapshot<B> {
    /// Checks internal consistency.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] when the header disagrees with the
    /// embedded state.
    pub fn verify(&self) -> Result<(), ProtocolError> {
        if self.turn_index != self.state.turn_index {
            return Err(ProtocolError::InvalidMessage(format!(
                "snapshot turn {} does not match state turn {}",
                self.turn_index, self.state.turn_index
            )));
        }
        if self.last_applied != self.state.last_applied {
            return Err(ProtocolError::InvalidMessage(
                "snapshot high-water marks do not match state".into(),
            ));
        }
        Ok(())
    }
}
