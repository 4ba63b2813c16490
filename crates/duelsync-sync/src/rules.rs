//! The `RulesEngine` trait: where a game plugs its rules in.
//!
//! The sync layer never looks inside the board. It asks the engine three
//! things: what the board looks like at the start, whether a command is
//! legal, and what the board looks like after it.

use std::fmt::Debug;

use duelsync_protocol::{GameCommand, MatchPhase, PlayerId};
use serde::{Serialize, de::DeserializeOwned};

/// Game rules, as pure functions over an immutable board.
///
/// Both peers run the same engine against the same commands, so every
/// method must be deterministic: no clocks, no randomness, no iteration
/// over `HashMap`s. Anything random (dice, shuffles) must be seeded from
/// the board itself.
///
/// The executor has already checked the turn index, duplicates, and
/// whether the match is over before `validate` runs. `validate` only
/// needs the game-specific part: is it this issuer's move, is the target
/// square free, does the player have the resources.
pub trait RulesEngine: Send + Sync + 'static {
    /// The game-specific part of the state.
    ///
    /// `PartialEq` is how tests (and the demo) check that two peers
    /// converged. `Serialize + DeserializeOwned` is how it rides inside a
    /// snapshot.
    type Board: Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// The board at turn 0. `players` is in id order.
    fn init(players: &[PlayerId]) -> Self::Board;

    /// Game-specific legality check. `Err` carries a reason for the
    /// submitter. Default: everything is legal.
    fn validate(_board: &Self::Board, _command: &GameCommand) -> Result<(), String> {
        Ok(())
    }

    /// The board after `command`. Only called for commands that passed
    /// validation.
    fn apply(board: &Self::Board, command: &GameCommand) -> Self::Board;

    /// The match phase implied by `board`.
    fn phase(board: &Self::Board) -> MatchPhase;
}
