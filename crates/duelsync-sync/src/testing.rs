//! Rules engines and command builders shared by the unit tests.

use std::collections::BTreeMap;

use duelsync_protocol::{Action, CommandId, GameCommand, MatchPhase, PlayerId, Square};
use serde::{Deserialize, Serialize};

use crate::RulesEngine;

/// A board that just records what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub players: Vec<PlayerId>,
    pub moves: Vec<CommandId>,
    pub credits: BTreeMap<PlayerId, i64>,
    pub conceded: Option<PlayerId>,
}

fn init(players: &[PlayerId]) -> Tally {
    Tally {
        players: players.to_vec(),
        moves: Vec::new(),
        credits: players.iter().map(|&p| (p, 0)).collect(),
        conceded: None,
    }
}

fn apply(board: &Tally, command: &GameCommand) -> Tally {
    let mut next = board.clone();
    match command.action() {
        Action::Move { .. } => next.moves.push(command.id()),
        Action::Pass => {}
        Action::Concede => next.conceded = Some(command.issuer()),
        Action::DebugAdjust { target, delta } => {
            *next.credits.entry(*target).or_insert(0) += delta;
        }
    }
    next
}

fn phase(board: &Tally) -> MatchPhase {
    match board.conceded {
        Some(loser) => MatchPhase::Finished {
            winner: board.players.iter().copied().find(|&p| p != loser),
        },
        None => MatchPhase::Active,
    }
}

fn reject_empty_move(command: &GameCommand) -> Result<(), String> {
    match command.action() {
        Action::Move { from, to } if from == to => Err("move goes nowhere".into()),
        _ => Ok(()),
    }
}

/// Players alternate: turn `t` belongs to `players[t % n]`.
pub struct Alternating;

impl RulesEngine for Alternating {
    type Board = Tally;

    fn init(players: &[PlayerId]) -> Tally {
        init(players)
    }

    fn validate(board: &Tally, command: &GameCommand) -> Result<(), String> {
        reject_empty_move(command)?;
        if command.is_any_time() || board.players.is_empty() {
            return Ok(());
        }
        let owner = board.players[(command.turn_index() % board.players.len() as u64) as usize];
        if owner != command.issuer() {
            return Err(format!("turn {} belongs to {owner}", command.turn_index()));
        }
        Ok(())
    }

    fn apply(board: &Tally, command: &GameCommand) -> Tally {
        apply(board, command)
    }

    fn phase(board: &Tally) -> MatchPhase {
        phase(board)
    }
}

/// Anyone may act on any turn.
pub struct FreeForAll;

impl RulesEngine for FreeForAll {
    type Board = Tally;

    fn init(players: &[PlayerId]) -> Tally {
        init(players)
    }

    fn validate(_board: &Tally, command: &GameCommand) -> Result<(), String> {
        reject_empty_move(command)
    }

    fn apply(board: &Tally, command: &GameCommand) -> Tally {
        apply(board, command)
    }

    fn phase(board: &Tally) -> MatchPhase {
        phase(board)
    }
}

pub const P1: PlayerId = PlayerId(1);
pub const P2: PlayerId = PlayerId(2);

pub fn step() -> Action {
    Action::Move {
        from: Square::new(0, 0),
        to: Square::new(0, 1),
    }
}

pub fn mv(issuer: PlayerId, seq: u64, turn: u64) -> GameCommand {
    GameCommand::new(issuer, seq, turn, step(), 0)
}

pub fn cmd(issuer: PlayerId, seq: u64, turn: u64, action: Action) -> GameCommand {
    GameCommand::new(issuer, seq, turn, action, 0)
}
