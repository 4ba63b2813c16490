//! Two sync managers wired back to back.
//!
//! The "network" is the test itself: frames are moved from one manager to
//! the other by hand, so loss, duplication, reordering, and disconnects
//! are all explicit. The clock is a plain `Instant` that only moves when a
//! test moves it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use duelsync_protocol::{
    Action, CommandId, Envelope, GameCommand, GameState, MatchPhase, PlayerId, Snapshot, Square,
    SyncMessage,
};
use duelsync_room::{RoomConfig, RoomManager, RoomState};
use duelsync_session::{ChannelStatus, LinkState, ReconnectConfig, RetryPolicy};
use duelsync_sync::{
    LinkDirective, Receipt, RejectReason, RulesEngine, SnapshotError, SyncConfig, SyncError,
    SyncEvent, SyncManager,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// A tiny game: anyone may move on any turn, and every move is logged.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Log {
    entries: Vec<CommandId>,
    credits: BTreeMap<PlayerId, i64>,
}

struct Ledger;

impl RulesEngine for Ledger {
    type Board = Log;

    fn init(_players: &[PlayerId]) -> Log {
        Log::default()
    }

    fn validate(_board: &Log, command: &GameCommand) -> Result<(), String> {
        match command.action() {
            Action::Move { from, to } if from == to => Err("move goes nowhere".into()),
            _ => Ok(()),
        }
    }

    fn apply(board: &Log, command: &GameCommand) -> Log {
        let mut next = board.clone();
        match command.action() {
            Action::Move { .. } => next.entries.push(command.id()),
            Action::DebugAdjust { target, delta } => {
                *next.credits.entry(*target).or_insert(0) += delta;
            }
            Action::Pass | Action::Concede => {}
        }
        next
    }

    fn phase(_board: &Log) -> MatchPhase {
        MatchPhase::Active
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const P1: PlayerId = PlayerId(1);
const P2: PlayerId = PlayerId(2);

type Peer = SyncManager<Ledger>;

fn peer_with(id: PlayerId, config: SyncConfig, t0: Instant) -> Peer {
    let mut room = RoomManager::new(id, RoomConfig::default());
    room.join_room("ABC234").expect("join");
    SyncManager::new(&[P1, P2], room, config, t0).expect("manager")
}

fn peer(id: PlayerId, t0: Instant) -> Peer {
    peer_with(id, SyncConfig::default(), t0)
}

fn step() -> Action {
    Action::Move {
        from: Square::new(0, 0),
        to: Square::new(1, 0),
    }
}

fn id(issuer: PlayerId, seq: u64) -> CommandId {
    CommandId::new(issuer, seq)
}

/// Polls `m` and carries out a connect request successfully.
fn drive(m: &mut Peer, now: Instant) {
    if let Some(LinkDirective::Connect { .. }) = m.poll(now) {
        m.connect_succeeded(now);
    }
}

/// Publishes everything `from` has queued to `to`. Returns the count.
fn deliver(from: &mut Peer, to: &mut Peer, now: Instant) -> usize {
    let frames = from.take_outgoing();
    let count = frames.len();
    for frame in frames {
        from.publish_succeeded(frame.command_seq);
        to.handle_bytes(&frame.bytes, now);
    }
    count
}

/// Runs both peers until nothing is left to deliver.
fn settle(a: &mut Peer, b: &mut Peer, now: Instant) {
    for _ in 0..32 {
        drive(a, now);
        drive(b, now);
        if deliver(a, b, now) + deliver(b, a, now) == 0 {
            return;
        }
    }
    panic!("peers never settled");
}

/// Two connected peers with their handshake events drained.
fn connected_pair(t0: Instant) -> (Peer, Peer) {
    let mut a = peer(P1, t0);
    let mut b = peer(P2, t0);
    settle(&mut a, &mut b, t0);
    assert_eq!(a.link_state(), LinkState::Connected);
    assert_eq!(b.link_state(), LinkState::Connected);
    a.drain_events();
    b.drain_events();
    (a, b)
}

fn state_turns(events: &[SyncEvent<Log>]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::StateChanged { turn_index, .. } => Some(*turn_index),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Handshake and presence
// =========================================================================

#[test]
fn test_handshake_connects_and_pairs_both_peers() {
    let t0 = Instant::now();
    let mut a = peer(P1, t0);
    let mut b = peer(P2, t0);
    settle(&mut a, &mut b, t0);

    for (m, other) in [(&a, P2), (&b, P1)] {
        assert_eq!(m.link_state(), LinkState::Connected);
        assert_eq!(m.room().state(), RoomState::Paired);
        assert_eq!(m.session().remote, Some(other));
        assert_eq!(m.session().status, ChannelStatus::Connected);
    }

    let events = a.drain_events();
    assert!(events.iter().any(|e| matches!(e, SyncEvent::Presence { peer, present: true } if *peer == P2)));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::Link(LinkState::Connected))));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::ConnectionStatus(ChannelStatus::Connected))));
}

#[test]
fn test_goodbye_returns_room_to_waiting() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    b.leave().expect("leave");
    deliver(&mut b, &mut a, t0);

    assert_eq!(a.room().state(), RoomState::Waiting);
    assert!(a
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Presence { peer, present: false } if *peer == P2)));
}

// =========================================================================
// Live play
// =========================================================================

#[test]
fn test_local_apply_then_broadcast_converges() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    let receipt = a.submit(step(), t0).expect("submit");
    assert!(matches!(receipt, Receipt::Applied { turn_index: 1, id, .. } if id == self::id(P1, 1)));
    // Applied locally before anything was published.
    assert_eq!(a.turn_index(), 1);
    assert_eq!(b.turn_index(), 0);

    deliver(&mut a, &mut b, t0);
    deliver(&mut b, &mut a, t0);

    assert_eq!(**a.state(), **b.state());
    assert_eq!(a.pending_commands(), 0);
    assert!(a
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Delivered { id } if *id == self::id(P1, 1))));
}

#[test]
fn test_rejected_submission_consumes_no_sequence_number() {
    let t0 = Instant::now();
    let (mut a, _b) = connected_pair(t0);

    let nowhere = Action::Move {
        from: Square::new(3, 3),
        to: Square::new(3, 3),
    };
    let result = a.submit(nowhere, t0);
    assert!(matches!(result, Err(SyncError::Rejected(RejectReason::Rules(_)))));
    assert!(a.take_outgoing().is_empty());

    let receipt = a.submit(step(), t0).expect("submit");
    assert!(matches!(receipt, Receipt::Applied { id, .. } if id.seq == 1));
}

#[test]
fn test_reordered_delivery_applies_in_sequence_order() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    for _ in 0..3 {
        a.submit(step(), t0).expect("submit");
    }
    let frames = a.take_outgoing();
    assert_eq!(frames.len(), 3);

    for i in [1, 2, 0] {
        b.handle_bytes(&frames[i].bytes, t0);
    }

    assert_eq!(**a.state(), **b.state());
    assert_eq!(
        b.state().board.entries,
        vec![id(P1, 1), id(P1, 2), id(P1, 3)]
    );
    assert_eq!(state_turns(&b.drain_events()), vec![1, 2, 3]);
}

#[test]
fn test_duplicate_delivery_is_idempotent_and_reacknowledged() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");
    let frame = a.take_outgoing().remove(0);

    b.handle_bytes(&frame.bytes, t0);
    b.handle_bytes(&frame.bytes, t0);

    assert_eq!(b.turn_index(), 1);
    assert_eq!(b.state().board.entries.len(), 1);
    assert_eq!(state_turns(&b.drain_events()), vec![1]);
    let acks: Vec<_> = b.take_outgoing().into_iter().filter(|f| f.label == "ack").collect();
    assert_eq!(acks.len(), 2);
}

#[test]
fn test_unacknowledged_command_is_resent_after_ack_timeout() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");
    // Lost in transit.
    a.take_outgoing();

    let later = t0 + Duration::from_secs(1);
    assert_eq!(a.next_deadline(), Some(later));
    a.poll(later);
    deliver(&mut a, &mut b, later);
    deliver(&mut b, &mut a, later);

    assert_eq!(**a.state(), **b.state());
    assert_eq!(a.pending_commands(), 0);
}

// =========================================================================
// Gaps
// =========================================================================

#[test]
fn test_gap_timeout_resyncs_and_converges() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    for _ in 0..3 {
        a.submit(step(), t0).expect("submit");
    }
    let frames = a.take_outgoing();
    b.handle_bytes(&frames[1].bytes, t0);
    b.handle_bytes(&frames[2].bytes, t0);
    assert_eq!(b.turn_index(), 0, "nothing applies across a gap");

    let later = t0 + Duration::from_secs(2);
    assert_eq!(b.next_deadline(), Some(later));
    b.poll(later);
    assert_eq!(b.link_state(), LinkState::Resyncing);

    settle(&mut a, &mut b, later);
    assert_eq!(b.link_state(), LinkState::Connected);
    assert_eq!(**a.state(), **b.state());
}

#[test]
fn test_reorder_overflow_resyncs_immediately() {
    let t0 = Instant::now();
    let mut a = peer(P1, t0);
    let mut b = peer_with(
        P2,
        SyncConfig {
            reorder_capacity: 2,
            ..SyncConfig::default()
        },
        t0,
    );
    settle(&mut a, &mut b, t0);

    for _ in 0..4 {
        a.submit(step(), t0).expect("submit");
    }
    let frames = a.take_outgoing();
    for frame in &frames[1..] {
        b.handle_bytes(&frame.bytes, t0);
    }
    assert_eq!(b.link_state(), LinkState::Resyncing);

    settle(&mut a, &mut b, t0);
    assert_eq!(**a.state(), **b.state());
    assert_eq!(b.turn_index(), 4);
}

// =========================================================================
// Disconnect and resync
// =========================================================================

#[test]
fn test_reconnect_after_missed_commands_converges() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    b.on_channel_lost(t0);
    assert_eq!(b.session().status, ChannelStatus::Disconnected);
    for _ in 0..5 {
        a.submit(step(), t0).expect("submit");
    }
    // b is off the channel; none of it arrives.
    a.take_outgoing();

    settle(&mut a, &mut b, t0);

    assert_eq!(b.link_state(), LinkState::Connected);
    assert_eq!(b.session().last_synced_turn_index, a.turn_index());
    assert_eq!(a.turn_index(), 5);
    assert_eq!(**a.state(), **b.state());

    let links: Vec<LinkState> = b
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::Link(link) => Some(link),
            _ => None,
        })
        .collect();
    assert_eq!(
        links,
        vec![
            LinkState::Disconnected,
            LinkState::Reconnecting { attempt: 1 },
            LinkState::Resyncing,
            LinkState::Connected,
        ]
    );
}

#[test]
fn test_offline_moves_apply_once_in_order_after_reconnect() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    // Move A reaches b, but b's ack is lost.
    a.submit(step(), t0).expect("move A");
    deliver(&mut a, &mut b, t0);
    b.take_outgoing();

    // a drops off and makes move B offline.
    a.on_channel_lost(t0);
    let receipt = a.submit(step(), t0).expect("move B");
    let Receipt::Queued { ticket } = receipt else {
        panic!("expected a draft, got {receipt:?}");
    };
    assert_eq!(a.draft_count(), 1);

    // On reconnect, seq 1 is republished (a duplicate for b) and move B is
    // sealed as seq 2.
    settle(&mut a, &mut b, t0);

    assert_eq!(a.link_state(), LinkState::Connected);
    assert_eq!(b.state().board.entries, vec![id(P1, 1), id(P1, 2)]);
    assert_eq!(b.state().last_applied_for(P1), 2);
    assert_eq!(**a.state(), **b.state());
    assert!(a
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Accepted { ticket: t, id } if *t == ticket && *id == self::id(P1, 2))));
}

#[test]
fn test_offline_draft_for_a_passed_turn_is_obsolete() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    a.on_channel_lost(t0);
    let ticket = a.submit(step(), t0).expect("draft").ticket();
    // Meanwhile b plays turn 0; a never hears about it.
    b.submit(step(), t0).expect("submit");
    b.take_outgoing();

    settle(&mut a, &mut b, t0);

    assert_eq!(a.link_state(), LinkState::Connected);
    assert_eq!(**a.state(), **b.state());
    assert!(a.drain_events().iter().any(|e| matches!(
        e,
        SyncEvent::Refused {
            ticket: Some(t),
            error: SyncError::Obsolete { claimed: 0, current: 1, .. },
        } if *t == ticket
    )));

    // The obsolete draft used no sequence number.
    let next = a.submit(step(), t0).expect("submit");
    assert!(matches!(next, Receipt::Applied { id, .. } if id.seq == 1));
}

#[test]
fn test_cancelled_draft_is_never_sent() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);

    a.on_channel_lost(t0);
    let ticket = a.submit(step(), t0).expect("draft").ticket();
    assert!(a.cancel(ticket));

    settle(&mut a, &mut b, t0);
    assert_eq!(b.state().last_applied_for(P1), 0);
    assert_eq!(a.pending_commands(), 0);
}

#[test]
fn test_regressing_snapshot_is_refused_and_requested_again() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");
    a.submit(step(), t0).expect("submit");
    settle(&mut a, &mut b, t0);

    a.on_channel_lost(t0);
    drive(&mut a, t0);
    assert_eq!(a.link_state(), LinkState::Resyncing);
    a.poll(t0);
    a.take_outgoing();

    // An answer that would take a back to turn 0.
    let stale = Snapshot::capture(&GameState::new(Log::default(), MatchPhase::Active));
    let refused_at = t0 + Duration::from_millis(10);
    a.handle_envelope(
        Envelope::new(P2, 0, SyncMessage::Snapshot { to: P1, snapshot: stale }),
        refused_at,
    );
    assert_eq!(a.link_state(), LinkState::Resyncing);
    assert_eq!(a.turn_index(), 2);
    assert!(a.drain_events().iter().any(|e| matches!(
        e,
        SyncEvent::Refused {
            ticket: None,
            error: SyncError::Snapshot(SnapshotError::Regression {
                snapshot_turn: 0,
                local_turn: 2,
            }),
        }
    )));

    let retry_at = refused_at + Duration::from_millis(500);
    assert_eq!(a.next_deadline(), Some(retry_at));
    a.poll(retry_at);
    let frames = a.take_outgoing();
    assert!(frames.iter().any(|f| f.label == "snapshot_request"));
    for frame in &frames {
        b.handle_bytes(&frame.bytes, retry_at);
    }

    settle(&mut a, &mut b, retry_at);
    assert_eq!(a.link_state(), LinkState::Connected);
    assert_eq!(**a.state(), **b.state());
}

// =========================================================================
// Giving up
// =========================================================================

#[test]
fn test_retry_exhaustion_abandons_exactly_once() {
    let t0 = Instant::now();
    let config = SyncConfig {
        reconnect: ReconnectConfig {
            reconnect: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..ReconnectConfig::default()
        },
        ..SyncConfig::default()
    };
    let mut a = peer_with(P1, config, t0);
    let draft = a.submit(step(), t0).expect("draft").ticket();

    let mut now = t0;
    let mut connects = 0;
    for _ in 0..50 {
        match a.poll(now) {
            Some(LinkDirective::Connect { .. }) => {
                connects += 1;
                a.connect_failed(now);
            }
            None => match a.next_deadline() {
                Some(at) => now = at,
                None => break,
            },
        }
    }

    assert_eq!(connects, 3);
    assert_eq!(a.link_state(), LinkState::Abandoned);
    let events = a.drain_events();
    let match_wide = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Refused { ticket: None, error: SyncError::Abandoned { attempts: 3 } }))
        .count();
    assert_eq!(match_wide, 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SyncEvent::Link(LinkState::Abandoned)))
            .count(),
        1
    );
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Refused { ticket: Some(t), error: SyncError::Abandoned { .. } } if *t == draft
    )));

    assert_eq!(
        a.submit(step(), now).unwrap_err(),
        SyncError::Abandoned { attempts: 3 }
    );
    assert!(a.poll(now + Duration::from_secs(60)).is_none());
}

#[test]
fn test_send_budget_exhaustion_reports_delivery_failed_once() {
    let t0 = Instant::now();
    let (mut a, _b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");

    let mut now = t0;
    let mut failures = 0;
    for _ in 0..12 {
        for frame in a.take_outgoing() {
            if frame.command_seq.is_some() {
                failures += 1;
                a.publish_failed(frame.command_seq, now);
            }
        }
        now = a.next_deadline().expect("failed command left without a deadline");
        a.poll(now);
    }

    // Past the budget the command keeps going out on the ack timeout.
    assert_eq!(failures, 12);
    let reported: Vec<_> = a
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Refused { error: SyncError::DeliveryFailed { .. }, .. }))
        .collect();
    assert_eq!(reported.len(), 1);
    // Never silently dropped.
    assert_eq!(a.pending_commands(), 1);
}

#[test]
fn test_exhausted_command_converges_once_publishing_recovers() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");

    let mut now = t0;
    for _ in 0..5 {
        for frame in a.take_outgoing() {
            a.publish_failed(frame.command_seq, now);
        }
        now = a.next_deadline().expect("deadline");
        a.poll(now);
    }
    assert!(a.drain_events().iter().any(|e| matches!(
        e,
        SyncEvent::Refused {
            error: SyncError::DeliveryFailed { attempts: 5, .. },
            ..
        }
    )));

    // The link never went down; the next resend simply gets through.
    settle(&mut a, &mut b, now);
    assert_eq!(b.state().last_applied_for(P1), 1);
    assert_eq!(**a.state(), **b.state());
    assert_eq!(a.pending_commands(), 0);
    let delivered = id(P1, 1);
    assert!(
        a.drain_events()
            .iter()
            .any(|e| matches!(e, SyncEvent::Delivered { id } if *id == delivered))
    );
    assert_eq!(a.next_deadline(), None);
}

// =========================================================================
// Opponent leaving
// =========================================================================

#[test]
fn test_goodbye_holds_unacked_commands_until_opponent_returns() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(t0);
    a.submit(step(), t0).expect("submit");
    a.take_outgoing(); // lost

    b.leave().expect("leave");
    deliver(&mut b, &mut a, t0);
    assert_eq!(a.room().remote(), None);
    assert_eq!(a.next_deadline(), None);

    let later = t0 + Duration::from_secs(30);
    a.poll(later);
    assert!(a.take_outgoing().iter().all(|f| f.command_seq.is_none()));
    assert_eq!(a.pending_commands(), 1);

    // A returning opponent gets the held command.
    let mut c = peer(P2, later);
    settle(&mut a, &mut c, later);
    assert_eq!(c.link_state(), LinkState::Connected);
    assert_eq!(a.pending_commands(), 0);
    assert_eq!(**a.state(), **c.state());
}
