//! The authority executor: the only code that turns a command into a new
//! state.
//!
//! ```text
//!          execute()
//! Idle ──────────────→ Validating ──(accept)──→ Applying ──→ Idle
//!                          │
//!                          └──(reject)──→ Rejected  (until the next execute)
//! ```
//!
//! Both peers run the same executor with the same rules over the same
//! commands in the same per-issuer order. That, and nothing else, is what
//! keeps their states identical; there is no rollback.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use duelsync_protocol::{GameCommand, GameState, PlayerId};

use crate::{AuthorityMode, RulesEngine};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a command came from. Only matters under
/// [`AuthorityMode::TrustRemote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// The executor's own lifecycle, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    Idle,
    Validating,
    Applying,
    /// The last command was rejected.
    Rejected,
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The command claims a turn that has not started.
    #[error("claims turn {claimed}, match is at turn {current}")]
    TurnMismatch { claimed: u64, current: u64 },

    #[error("match is finished")]
    MatchFinished,

    /// The rules engine said no.
    #[error("{0}")]
    Rules(String),
}

/// The result of validating a command without applying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Already consumed.
    Duplicate,
    /// Claims a turn that has already passed.
    Stale { current_turn: u64 },
    Reject(RejectReason),
}

/// The result of [`AuthorityExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new state was committed.
    Applied { turn_index: u64 },
    /// Already consumed; nothing changed.
    Duplicate,
    /// Consumed without effect: the turn it claimed is over.
    Stale { current_turn: u64 },
    /// Consumed without effect: refused.
    Rejected(RejectReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// AuthorityExecutor
// ---------------------------------------------------------------------------

/// Validates and applies commands against the current [`GameState`].
///
/// The state lives behind an `Arc` and is replaced wholesale on every
/// commit; readers holding an older `Arc` keep a consistent view.
pub struct AuthorityExecutor<R: RulesEngine> {
    state: Arc<GameState<R::Board>>,
    phase: ExecutorPhase,
    mode: AuthorityMode,
    _rules: PhantomData<fn() -> R>,
}

impl<R: RulesEngine> AuthorityExecutor<R> {
    /// An executor at turn 0 with the engine's initial board.
    pub fn new(players: &[PlayerId], mode: AuthorityMode) -> Self {
        let board = R::init(players);
        let phase = R::phase(&board);
        Self::from_state(GameState::new(board, phase), mode)
    }

    /// An executor resuming from an existing state.
    pub fn from_state(state: GameState<R::Board>, mode: AuthorityMode) -> Self {
        Self {
            state: Arc::new(state),
            phase: ExecutorPhase::Idle,
            mode,
            _rules: PhantomData,
        }
    }

    pub fn state(&self) -> &Arc<GameState<R::Board>> {
        &self.state
    }

    pub fn turn_index(&self) -> u64 {
        self.state.turn_index
    }

    pub fn phase(&self) -> ExecutorPhase {
        self.phase
    }

    pub fn mode(&self) -> AuthorityMode {
        self.mode
    }

    /// Runs every check `execute` would, without committing anything.
    ///
    /// Order: duplicate, finished match, turn index, rules.
    pub fn check(&self, command: &GameCommand, origin: Origin) -> Verdict {
        let state = &*self.state;

        if command.seq() <= state.last_applied_for(command.issuer()) {
            return Verdict::Duplicate;
        }
        if state.phase.is_finished() {
            return Verdict::Reject(RejectReason::MatchFinished);
        }
        if !command.is_any_time() {
            match command.turn_index().cmp(&state.turn_index) {
                Ordering::Less => {
                    return Verdict::Stale {
                        current_turn: state.turn_index,
                    };
                }
                Ordering::Greater => {
                    return Verdict::Reject(RejectReason::TurnMismatch {
                        claimed: command.turn_index(),
                        current: state.turn_index,
                    });
                }
                Ordering::Equal => {}
            }
        }

        let trusted = self.mode == AuthorityMode::TrustRemote && origin == Origin::Remote;
        if !trusted {
            if let Err(reason) = R::validate(&state.board, command) {
                return Verdict::Reject(RejectReason::Rules(reason));
            }
        }
        Verdict::Accept
    }

    /// Validates and, if accepted, applies `command`.
    ///
    /// Every verdict except `Duplicate` records the command's sequence
    /// number as consumed, so a refused command never blocks the issuer's
    /// later ones. Only `Applied` changes the board or the turn.
    ///
    /// Turn-bound actions advance the turn; any-time actions do not.
    pub fn execute(&mut self, command: &GameCommand, origin: Origin) -> ApplyOutcome {
        self.phase = ExecutorPhase::Validating;

        match self.check(command, origin) {
            Verdict::Duplicate => {
                tracing::debug!(id = %command.id(), "duplicate command ignored");
                self.phase = ExecutorPhase::Idle;
                ApplyOutcome::Duplicate
            }
            Verdict::Stale { current_turn } => {
                tracing::debug!(
                    id = %command.id(),
                    claimed = command.turn_index(),
                    current_turn,
                    "stale command consumed without effect"
                );
                self.consume(command);
                self.phase = ExecutorPhase::Idle;
                ApplyOutcome::Stale { current_turn }
            }
            Verdict::Reject(reason) => {
                tracing::debug!(id = %command.id(), %reason, "command rejected");
                self.consume(command);
                self.phase = ExecutorPhase::Rejected;
                ApplyOutcome::Rejected(reason)
            }
            Verdict::Accept => {
                self.phase = ExecutorPhase::Applying;
                let turn_index = self.commit(command);
                self.phase = ExecutorPhase::Idle;
                tracing::trace!(id = %command.id(), kind = %command.kind(), turn_index, "command applied");
                ApplyOutcome::Applied { turn_index }
            }
        }
    }

    /// Replaces the whole state, board and high-water marks included.
    /// Used by snapshot apply; callers check the snapshot first.
    pub fn replace_state(&mut self, state: GameState<R::Board>) -> Arc<GameState<R::Board>> {
        self.state = Arc::new(state);
        self.phase = ExecutorPhase::Idle;
        Arc::clone(&self.state)
    }

    fn commit(&mut self, command: &GameCommand) -> u64 {
        let current = &*self.state;
        let board = R::apply(&current.board, command);
        let turn_index = if command.is_any_time() {
            current.turn_index
        } else {
            current.turn_index + 1
        };
        let mut last_applied = current.last_applied.clone();
        last_applied.insert(command.issuer(), command.seq());

        self.state = Arc::new(GameState {
            turn_index,
            phase: R::phase(&board),
            board,
            last_applied,
        });
        turn_index
    }

    fn consume(&mut self, command: &GameCommand) {
        let state = Arc::make_mut(&mut self.state);
        let mark = state.last_applied.entry(command.issuer()).or_insert(0);
        *mark = (*mark).max(command.seq());
    }
}

impl<R: RulesEngine> fmt::Debug for AuthorityExecutor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityExecutor")
            .field("turn_index", &self.state.turn_index)
            .field("phase", &self.phase)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use duelsync_protocol::{Action, MatchPhase, Square};

    use super::*;
    use crate::testing::{Alternating, FreeForAll, P1, P2, cmd, mv};

    fn executor() -> AuthorityExecutor<Alternating> {
        AuthorityExecutor::new(&[P1, P2], AuthorityMode::Symmetric)
    }

    // =====================================================================
    // Applying
    // =====================================================================

    #[test]
    fn test_execute_applies_and_advances_turn() {
        let mut ex = executor();
        let outcome = ex.execute(&mv(P1, 1, 0), Origin::Local);

        assert_eq!(outcome, ApplyOutcome::Applied { turn_index: 1 });
        assert_eq!(ex.turn_index(), 1);
        assert_eq!(ex.state().last_applied_for(P1), 1);
        assert_eq!(ex.state().board.moves.len(), 1);
        assert_eq!(ex.phase(), ExecutorPhase::Idle);
    }

    #[test]
    fn test_execute_replaces_arc_and_leaves_old_view_intact() {
        let mut ex = executor();
        let before = Arc::clone(ex.state());
        ex.execute(&mv(P1, 1, 0), Origin::Local);

        assert_eq!(before.turn_index, 0);
        assert!(before.board.moves.is_empty());
        assert!(!Arc::ptr_eq(&before, ex.state()));
    }

    #[test]
    fn test_same_commands_same_state_on_two_executors() {
        let commands = [
            mv(P1, 1, 0),
            mv(P2, 1, 1),
            cmd(P2, 2, 2, Action::DebugAdjust { target: P1, delta: 5 }),
            mv(P1, 2, 2),
        ];
        let mut a = executor();
        let mut b = executor();
        for c in &commands {
            a.execute(c, Origin::Local);
            b.execute(c, Origin::Remote);
        }
        assert_eq!(**a.state(), **b.state());
        assert_eq!(a.turn_index(), 3);
    }

    #[test]
    fn test_any_time_action_does_not_advance_turn() {
        let mut ex = executor();
        let outcome = ex.execute(
            &cmd(P2, 1, 0, Action::DebugAdjust { target: P2, delta: 3 }),
            Origin::Remote,
        );
        assert_eq!(outcome, ApplyOutcome::Applied { turn_index: 0 });
        assert_eq!(ex.state().board.credits[&P2], 3);
    }

    #[test]
    fn test_concede_finishes_match_and_later_commands_are_rejected() {
        let mut ex = executor();
        ex.execute(&cmd(P2, 1, 0, Action::Concede), Origin::Remote);
        assert_eq!(
            ex.state().phase,
            MatchPhase::Finished { winner: Some(P1) }
        );

        let outcome = ex.execute(&mv(P1, 1, 0), Origin::Local);
        assert_eq!(outcome, ApplyOutcome::Rejected(RejectReason::MatchFinished));
    }

    // =====================================================================
    // Refusals
    // =====================================================================

    #[test]
    fn test_duplicate_changes_nothing() {
        let mut ex = executor();
        ex.execute(&mv(P1, 1, 0), Origin::Local);
        let after_first = Arc::clone(ex.state());

        assert_eq!(ex.execute(&mv(P1, 1, 0), Origin::Remote), ApplyOutcome::Duplicate);
        assert!(Arc::ptr_eq(&after_first, ex.state()));
    }

    #[test]
    fn test_lower_turn_is_stale_and_consumed() {
        let mut ex = executor();
        ex.execute(&mv(P1, 1, 0), Origin::Local);

        let outcome = ex.execute(&mv(P2, 1, 0), Origin::Remote);
        assert_eq!(outcome, ApplyOutcome::Stale { current_turn: 1 });
        assert_eq!(ex.turn_index(), 1);
        assert_eq!(ex.state().last_applied_for(P2), 1);
    }

    #[test]
    fn test_higher_turn_is_turn_mismatch() {
        let ex = executor();
        assert_eq!(
            ex.check(&mv(P1, 1, 4), Origin::Local),
            Verdict::Reject(RejectReason::TurnMismatch {
                claimed: 4,
                current: 0
            })
        );
    }

    #[test]
    fn test_rules_rejection_consumes_seq_and_sets_phase() {
        let mut ex = executor();
        // Turn 0 belongs to P1.
        let outcome = ex.execute(&mv(P2, 1, 0), Origin::Remote);

        assert!(matches!(outcome, ApplyOutcome::Rejected(RejectReason::Rules(_))));
        assert_eq!(ex.phase(), ExecutorPhase::Rejected);
        assert_eq!(ex.state().last_applied_for(P2), 1);
        assert_eq!(ex.turn_index(), 0);
    }

    #[test]
    fn test_trust_remote_skips_rules_for_remote_only() {
        let mut ex: AuthorityExecutor<Alternating> =
            AuthorityExecutor::new(&[P1, P2], AuthorityMode::TrustRemote);
        let out_of_turn = mv(P2, 1, 0);

        assert!(matches!(
            ex.check(&out_of_turn, Origin::Local),
            Verdict::Reject(RejectReason::Rules(_))
        ));
        assert!(ex.execute(&out_of_turn, Origin::Remote).is_applied());
    }

    #[test]
    fn test_check_does_not_commit() {
        let ex: AuthorityExecutor<FreeForAll> =
            AuthorityExecutor::new(&[P1, P2], AuthorityMode::Symmetric);
        let noop = cmd(
            P1,
            1,
            0,
            Action::Move {
                from: Square::new(2, 2),
                to: Square::new(2, 2),
            },
        );

        assert!(matches!(ex.check(&noop, Origin::Local), Verdict::Reject(_)));
        assert_eq!(ex.check(&mv(P1, 1, 0), Origin::Local), Verdict::Accept);
        assert_eq!(ex.state().last_applied_for(P1), 0);
    }

    #[test]
    fn test_replace_state_swaps_everything() {
        let mut ex = executor();
        let mut other = executor();
        other.execute(&mv(P1, 1, 0), Origin::Local);
        other.execute(&mv(P2, 1, 1), Origin::Remote);

        let replaced = ex.replace_state((**other.state()).clone());
        assert_eq!(*replaced, **other.state());
        assert_eq!(ex.turn_index(), 2);
        assert_eq!(ex.state().last_applied_for(P2), 1);
    }
}
