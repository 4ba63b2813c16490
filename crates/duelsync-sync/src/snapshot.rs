//! Full-state checkpoints: taking them, keeping a few, and applying the
//! ones the other peer sends.

use std::collections::VecDeque;
use std::sync::Arc;

use duelsync_protocol::{GameState, Snapshot};

use crate::{AuthorityExecutor, RulesEngine, SnapshotError};

/// Takes periodic checkpoints and gatekeeps inbound snapshots.
#[derive(Debug)]
pub struct SnapshotManager<B> {
    interval: u64,
    retained: usize,
    checkpoints: VecDeque<Snapshot<B>>,
}

impl<B: Clone> SnapshotManager<B> {
    pub fn new(interval: u64, retained: usize) -> Self {
        Self {
            interval: interval.max(1),
            retained: retained.max(1),
            checkpoints: VecDeque::new(),
        }
    }

    /// A snapshot of `state` as it is now. Pure read.
    pub fn take_snapshot(&self, state: &GameState<B>) -> Snapshot<B> {
        Snapshot::capture(state)
    }

    /// Records a checkpoint if `state` sits on an interval boundary that
    /// has not been recorded yet. Returns `true` if one was taken.
    pub fn maybe_checkpoint(&mut self, state: &GameState<B>) -> bool {
        let turn = state.turn_index;
        if turn == 0 || turn % self.interval != 0 {
            return false;
        }
        if self.checkpoints.back().is_some_and(|cp| cp.turn_index >= turn) {
            return false;
        }
        self.checkpoints.push_back(self.take_snapshot(state));
        while self.checkpoints.len() > self.retained {
            self.checkpoints.pop_front();
        }
        tracing::debug!(turn, kept = self.checkpoints.len(), "checkpoint taken");
        true
    }

    pub fn latest(&self) -> Option<&Snapshot<B>> {
        self.checkpoints.back()
    }

    /// Retained checkpoints, oldest first.
    pub fn checkpoints(&self) -> impl Iterator<Item = &Snapshot<B>> {
        self.checkpoints.iter()
    }

    /// Checks that `snapshot` may replace `local`.
    ///
    /// # Errors
    /// - [`SnapshotError::Inconsistent`] if the snapshot disagrees with
    ///   itself.
    /// - [`SnapshotError::Regression`] if it is behind `local`.
    pub fn validate(&self, snapshot: &Snapshot<B>, local: &GameState<B>) -> Result<(), SnapshotError> {
        snapshot
            .verify()
            .map_err(|e| SnapshotError::Inconsistent(e.to_string()))?;
        if snapshot.turn_index < local.turn_index {
            return Err(SnapshotError::Regression {
                snapshot_turn: snapshot.turn_index,
                local_turn: local.turn_index,
            });
        }
        Ok(())
    }

    /// Validates `snapshot` and, if it passes, replaces the executor's
    /// state with it. All or nothing: on error the executor is untouched.
    ///
    /// Checkpoints newer than the snapshot are dropped, since they describe
    /// a history the match no longer has.
    ///
    /// # Errors
    /// See [`validate`](Self::validate). Also
    /// [`SnapshotError::Inconsistent`] if the stored phase is not the one
    /// the rules derive from the board.
    pub fn apply_snapshot<R>(
        &mut self,
        snapshot: Snapshot<B>,
        executor: &mut AuthorityExecutor<R>,
    ) -> Result<Arc<GameState<B>>, SnapshotError>
    where
        R: RulesEngine<Board = B>,
    {
        self.validate(&snapshot, executor.state())?;
        let derived = R::phase(&snapshot.state.board);
        if derived != snapshot.state.phase {
            return Err(SnapshotError::Inconsistent(format!(
                "phase {:?} does not follow from the board ({derived:?})",
                snapshot.state.phase
            )));
        }

        let turn = snapshot.turn_index;
        self.checkpoints.retain(|cp| cp.turn_index <= turn);
        let state = executor.replace_state(snapshot.state);
        tracing::info!(turn, "snapshot applied");
        Ok(state)
    }
}
