use std::time::Duration;

use duelsync::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

const SIZE: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Unit {
    owner: PlayerId,
    at: Square,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    players: Vec<PlayerId>,
    units: Vec<Unit>,
    credits: Vec<(PlayerId, i64)>,
    conceded: Option<PlayerId>,
}

impl Field {
    fn unit_at(&self, square: Square) -> Option<&Unit> {
        self.units.iter().find(|u| u.at == square)
    }

    fn units_of(&self, player: PlayerId) -> usize {
        self.units.iter().filter(|u| u.owner == player).count()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for row in (0..SIZE).rev() {
            for col in 0..SIZE {
                let cell = match self.unit_at(Square::new(col, row)) {
                    Some(u) if Some(&u.owner) == self.players.first() => 'A',
                    Some(_) => 'B',
                    None => '.',
                };
                out.push(cell);
            }
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Game rules
// ---------------------------------------------------------------------------

/// Two players, two units each, on a 4x4 grid. Units step one square in
/// any direction; stepping onto an enemy captures it. Lose your last unit
/// (or concede) and the match is over.
struct Skirmish;

impl RulesEngine for Skirmish {
    type Board = Field;

    fn init(players: &[PlayerId]) -> Field {
        let mut units = Vec::new();
        if let [first, second, ..] = players {
            units.push(Unit { owner: *first, at: Square::new(0, 0) });
            units.push(Unit { owner: *first, at: Square::new(SIZE - 1, 0) });
            units.push(Unit { owner: *second, at: Square::new(0, SIZE - 1) });
            units.push(Unit { owner: *second, at: Square::new(SIZE - 1, SIZE - 1) });
        }
        Field {
            players: players.to_vec(),
            units,
            credits: players.iter().map(|&p| (p, 0)).collect(),
            conceded: None,
        }
    }

    fn validate(field: &Field, command: &GameCommand) -> Result<(), String> {
        if command.is_any_time() || field.players.is_empty() {
            return Ok(());
        }
        let owner = field.players[(command.turn_index() % field.players.len() as u64) as usize];
        if owner != command.issuer() {
            return Err(format!("turn {} belongs to {owner}", command.turn_index()));
        }

        let Action::Move { from, to } = command.action() else {
            return Ok(());
        };
        match field.unit_at(*from) {
            Some(unit) if unit.owner == command.issuer() => {}
            Some(_) => return Err(format!("{from} is not your unit")),
            None => return Err(format!("no unit on {from}")),
        }
        if to.col >= SIZE || to.row >= SIZE {
            return Err(format!("{to} is off the field"));
        }
        let reach = from.col.abs_diff(to.col).max(from.row.abs_diff(to.row));
        if reach != 1 {
            return Err("units move exactly one square".into());
        }
        if field.unit_at(*to).is_some_and(|u| u.owner == command.issuer()) {
            return Err(format!("{to} is occupied by your own unit"));
        }
        Ok(())
    }

    fn apply(field: &Field, command: &GameCommand) -> Field {
        let mut next = field.clone();
        match command.action() {
            Action::Move { from, to } => {
                next.units.retain(|u| u.at != *to);
                if let Some(unit) = next.units.iter_mut().find(|u| u.at == *from) {
                    unit.at = *to;
                }
            }
            Action::Pass => {}
            Action::Concede => next.conceded = Some(command.issuer()),
            Action::DebugAdjust { target, delta } => {
                if let Some((_, credits)) = next.credits.iter_mut().find(|(p, _)| p == target) {
                    *credits += delta;
                }
            }
        }
        next
    }

    fn phase(field: &Field) -> MatchPhase {
        let opponent_of = |loser: PlayerId| field.players.iter().copied().find(|&p| p != loser);
        if let Some(loser) = field.conceded {
            return MatchPhase::Finished { winner: opponent_of(loser) };
        }
        if let Some(&loser) = field.players.iter().find(|&&p| field.units_of(p) == 0) {
            return MatchPhase::Finished { winner: opponent_of(loser) };
        }
        MatchPhase::Active
    }
}

// ---------------------------------------------------------------------------
// Scripted match
// ---------------------------------------------------------------------------

const A: PlayerId = PlayerId(1);
const B: PlayerId = PlayerId(2);

fn step(from: (u8, u8), to: (u8, u8)) -> Action {
    Action::Move {
        from: Square::new(from.0, from.1),
        to: Square::new(to.0, to.1),
    }
}

fn spawn(hub: &MemoryHub, id: PlayerId, code: &str) -> Result<PeerHandle<Skirmish>, DuelsyncError> {
    let mut room = RoomManager::new(id, RoomConfig::default());
    room.join_room(code)?;
    let peer = Peer::builder()
        .players(&[A, B])
        .spawn::<Skirmish, _>(hub.channel(id), room)?;

    let mut events = peer.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::StateChanged { turn_index, state } => {
                    tracing::info!(peer = %id, turn_index, phase = ?state.phase, "state changed");
                }
                SyncEvent::Link(link) => tracing::info!(peer = %id, ?link, "link"),
                SyncEvent::Refused { error, .. } => tracing::warn!(peer = %id, %error, "refused"),
                _ => {}
            }
        }
    });
    Ok(peer)
}

async fn wait_for_turn(peer: &PeerHandle<Skirmish>, turn: u64) -> Result<(), DuelsyncError> {
    while peer.state().await?.turn_index < turn {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

async fn wait_connected(peer: &PeerHandle<Skirmish>) -> Result<(), DuelsyncError> {
    while peer.link_state().await? != LinkState::Connected {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let hub = MemoryHub::new();
    let code = RoomManager::new(A, RoomConfig::default()).create_room()?.to_string();
    tracing::info!(%code, "room created");

    let a = spawn(&hub, A, &code)?;
    let b = spawn(&hub, B, &code)?;
    wait_connected(&a).await?;
    wait_connected(&b).await?;

    a.submit(step((0, 0), (1, 1))).await?;
    wait_for_turn(&b, 1).await?;

    // The opponent's input arrives the way a UI would hand it over.
    b.submit_raw(
        "move",
        serde_json::json!({ "from": { "col": 3, "row": 3 }, "to": { "col": 2, "row": 2 } }),
    )
    .await?;
    wait_for_turn(&a, 2).await?;

    tracing::info!("cutting {B} off");
    hub.partition(B).await;
    a.submit(step((1, 1), (2, 2))).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    hub.heal(B).await;
    tracing::info!("{B} is back");

    wait_for_turn(&b, 3).await?;
    b.submit(step((0, 3), (1, 2))).await?;
    wait_for_turn(&a, 4).await?;
    a.submit(step((2, 2), (1, 2))).await?;
    wait_for_turn(&b, 5).await?;

    let (left, right) = (a.state().await?, b.state().await?);
    println!("{}", left.board.render());
    println!("phase: {:?}", left.phase);
    println!("converged: {}", left == right);

    a.leave().await?;
    b.leave().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(issuer: PlayerId, turn: u64, action: Action) -> GameCommand {
        GameCommand::new(issuer, turn + 1, turn, action, 0)
    }

    fn field() -> Field {
        Skirmish::init(&[A, B])
    }

    #[test]
    fn test_init_places_two_units_each() {
        let f = field();
        assert_eq!(f.units_of(A), 2);
        assert_eq!(f.units_of(B), 2);
        assert_eq!(Skirmish::phase(&f), MatchPhase::Active);
    }

    #[test]
    fn test_validate_out_of_turn_is_rejected() {
        let result = Skirmish::validate(&field(), &command(B, 0, step((0, 3), (0, 2))));
        assert!(result.unwrap_err().contains("belongs to"));
    }

    #[test]
    fn test_validate_long_step_is_rejected() {
        let result = Skirmish::validate(&field(), &command(A, 0, step((0, 0), (0, 2))));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_moving_enemy_unit_is_rejected() {
        let result = Skirmish::validate(&field(), &command(A, 0, step((0, 3), (0, 2))));
        assert!(result.unwrap_err().contains("not your unit"));
    }

    #[test]
    fn test_concede_is_accepted_out_of_turn() {
        let cmd = command(B, 0, Action::Concede);
        assert!(Skirmish::validate(&field(), &cmd).is_ok());
        let next = Skirmish::apply(&field(), &cmd);
        assert_eq!(Skirmish::phase(&next), MatchPhase::Finished { winner: Some(A) });
    }

    #[test]
    fn test_capturing_last_unit_finishes_match() {
        let mut f = field();
        f.units.retain(|u| u.owner == A || u.at == Square::new(0, SIZE - 1));
        f.units[0].at = Square::new(0, SIZE - 2);

        let next = Skirmish::apply(&f, &command(A, 0, step((0, 2), (0, 3))));
        assert_eq!(next.units_of(B), 0);
        assert_eq!(Skirmish::phase(&next), MatchPhase::Finished { winner: Some(A) });
    }

    #[test]
    fn test_debug_adjust_changes_credits() {
        let cmd = command(A, 0, Action::DebugAdjust { target: B, delta: 7 });
        let next = Skirmish::apply(&field(), &cmd);
        assert_eq!(next.credits, vec![(A, 0), (B, 7)]);
    }
}
