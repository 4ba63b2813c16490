//! The sync manager: one peer's side of the match, minus the I/O.
//!
//! Inputs are local submissions, bytes from the channel, presence, connect
//! results, and the passage of time. Outputs are [`OutboundFrame`]s to
//! publish, [`LinkDirective`]s to carry out, and [`SyncEvent`]s for the
//! game. The owner (the `Peer` actor in production, a loop in tests) calls
//! [`take_outgoing`](SyncManager::take_outgoing) and
//! [`drain_events`](SyncManager::drain_events) after every input.
//!
//! ```text
//! submit ──→ CommandSender ──seal──→ AuthorityExecutor ──→ StateChanged
//!                 │
//!                 └──────────→ Command frame ──→ (channel)
//!
//! (channel) ──→ InboundQueue ──in order──→ AuthorityExecutor ──→ StateChanged
//!                                                      └──→ Ack frame
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use duelsync_protocol::{
    Action, Codec, Envelope, GameCommand, GameState, JsonCodec, PlayerId, Snapshot, SyncMessage,
};
use duelsync_room::{RoomError, RoomManager};
use duelsync_session::{ChannelStatus, ConnectionSession, LinkState, ReconnectAction, ReconnectionManager};

use crate::{
    ApplyOutcome, AuthorityExecutor, CommandSender, InboundQueue, Offer, Origin, Receipt,
    RejectReason, RulesEngine, SnapshotManager, SyncConfig, SyncError, SyncEvent, Ticket,
    Transmission, Verdict,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Something the owner must do on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirective {
    /// Connect and subscribe to the room channel, then report through
    /// [`SyncManager::connect_succeeded`] or
    /// [`SyncManager::connect_failed`].
    Connect { attempt: u32 },
}

/// One encoded envelope, ready to publish on the room channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub bytes: Vec<u8>,
    /// Message label, for logs.
    pub label: &'static str,
    /// Set for command frames. Report the publish result with
    /// [`SyncManager::publish_succeeded`] / [`SyncManager::publish_failed`].
    pub command_seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// SyncManager
// ---------------------------------------------------------------------------

/// Everything one peer knows about the match, and the rules for changing
/// it.
pub struct SyncManager<R: RulesEngine> {
    local: PlayerId,
    codec: JsonCodec,
    room: RoomManager,
    session: ConnectionSession,
    executor: AuthorityExecutor<R>,
    sender: CommandSender,
    inbound: InboundQueue,
    snapshots: SnapshotManager<R::Board>,
    reconnect: ReconnectionManager,
    /// Last link state reported through events.
    reported_link: LinkState,
    outgoing: VecDeque<OutboundFrame>,
    events: VecDeque<SyncEvent<R::Board>>,
}

impl<R: RulesEngine> SyncManager<R> {
    /// A manager for the room `room` is in, with a fresh board for
    /// `players`. The link starts `Disconnected`; the first
    /// [`poll`](Self::poll) asks for a connect.
    ///
    /// # Errors
    /// [`RoomError::NotInRoom`] if `room` has not been created or joined.
    pub fn new(
        players: &[PlayerId],
        room: RoomManager,
        config: SyncConfig,
        now: Instant,
    ) -> Result<Self, RoomError> {
        let config = config.validated();
        let local = room.local();
        let channel = room.channel_id()?;

        let mut session = ConnectionSession::new(channel, local);
        if let Some(remote) = room.remote() {
            session.set_remote(remote);
        }

        let mut players = players.to_vec();
        players.sort();
        players.dedup();

        Ok(Self {
            local,
            codec: JsonCodec,
            session,
            executor: AuthorityExecutor::new(&players, config.authority),
            sender: CommandSender::new(local, config.send.clone(), config.ack_timeout),
            inbound: InboundQueue::new(config.reorder_capacity, config.gap_timeout),
            snapshots: SnapshotManager::new(config.checkpoint_interval, config.retained_checkpoints),
            reconnect: ReconnectionManager::new(config.reconnect.clone(), now),
            reported_link: LinkState::Disconnected,
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
            room,
        })
    }

    // -- Accessors -------------------------------------------------------

    pub fn local(&self) -> PlayerId {
        self.local
    }

    /// The current state. Cheap to clone.
    pub fn state(&self) -> &Arc<GameState<R::Board>> {
        self.executor.state()
    }

    pub fn turn_index(&self) -> u64 {
        self.executor.turn_index()
    }

    pub fn link_state(&self) -> LinkState {
        self.reconnect.state()
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn room(&self) -> &RoomManager {
        &self.room
    }

    /// The room channel id.
    pub fn channel(&self) -> &str {
        &self.session.room
    }

    pub fn executor(&self) -> &AuthorityExecutor<R> {
        &self.executor
    }

    pub fn snapshots(&self) -> &SnapshotManager<R::Board> {
        &self.snapshots
    }

    /// Sealed local commands the other peer has not acknowledged.
    pub fn pending_commands(&self) -> usize {
        self.sender.pending_count()
    }

    pub fn draft_count(&self) -> usize {
        self.sender.draft_count()
    }

    // -- Local submissions -----------------------------------------------

    /// Submits a local action.
    ///
    /// Connected: the action is checked, sealed, applied locally, and
    /// queued for broadcast. Otherwise it is held as a draft and replayed
    /// after the next resync.
    ///
    /// # Errors
    /// - [`SyncError::Rejected`] if the executor refuses it. No sequence
    ///   number is used.
    /// - [`SyncError::Abandoned`] once the link is gone for good.
    pub fn submit(&mut self, action: Action, now: Instant) -> Result<Receipt, SyncError> {
        self.reconnect.check_usable()?;

        if !self.reconnect.is_connected() {
            let claimed = self.projected_turn();
            let ticket = self.sender.draft(claimed, action, unix_millis());
            return Ok(Receipt::Queued { ticket });
        }

        let turn = self.executor.turn_index();
        let candidate = GameCommand::new(self.local, self.sender.next_seq(), turn, action.clone(), 0);
        match self.executor.check(&candidate, Origin::Local) {
            Verdict::Accept => {}
            Verdict::Reject(reason) => return Err(SyncError::Rejected(reason)),
            Verdict::Stale { current_turn } => {
                return Err(SyncError::Rejected(RejectReason::TurnMismatch {
                    claimed: turn,
                    current: current_turn,
                }));
            }
            Verdict::Duplicate => {
                return Err(SyncError::Rejected(RejectReason::Rules(
                    "sequence number already consumed".into(),
                )));
            }
        }

        let (ticket, command) = self.sender.seal(turn, action, unix_millis());
        let outcome = self.executor.execute(&command, Origin::Local);
        // The command consumed its sequence number either way, so it goes
        // out regardless; the other peer must consume it too.
        self.sender.release(command.seq(), now);
        self.flush_outbox(now);

        match outcome {
            ApplyOutcome::Applied { turn_index } => {
                self.state_changed();
                Ok(Receipt::Applied {
                    ticket,
                    id: command.id(),
                    turn_index,
                })
            }
            ApplyOutcome::Rejected(reason) => Err(SyncError::Rejected(reason)),
            other => Err(SyncError::Rejected(RejectReason::Rules(format!(
                "checked command came out {other:?}"
            )))),
        }
    }

    /// Drops a draft that has not been sent. Sealed commands cannot be
    /// recalled; submit a compensating action instead.
    ///
    /// A dropped draft is reported as [`SyncError::Cancelled`].
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        if !self.sender.cancel(ticket) {
            return false;
        }
        self.cancelled(ticket);
        true
    }

    /// Drops every draft, reporting each as [`SyncError::Cancelled`].
    pub fn cancel_drafts(&mut self) -> Vec<Ticket> {
        let tickets = self.sender.cancel_drafts();
        if !tickets.is_empty() {
            tracing::info!(count = tickets.len(), "drafts cancelled");
        }
        for &ticket in &tickets {
            self.cancelled(ticket);
        }
        tickets
    }

    /// Announces departure and leaves the room. Publish the resulting
    /// frames before disconnecting.
    ///
    /// # Errors
    /// [`RoomError::NotInRoom`] if already left.
    pub fn leave(&mut self) -> Result<(), RoomError> {
        self.room.leave_room()?;
        self.send(SyncMessage::Goodbye { player: self.local }, None);
        self.session.status = ChannelStatus::Disconnected;
        Ok(())
    }

    // -- Channel input ---------------------------------------------------

    /// Decodes and handles one published envelope. Undecodable bytes are
    /// logged and dropped.
    pub fn handle_bytes(&mut self, data: &[u8], now: Instant) {
        match self.codec.decode::<Envelope<R::Board>>(data) {
            Ok(envelope) => self.handle_envelope(envelope, now),
            Err(e) => tracing::warn!(error = %e, len = data.len(), "undecodable message dropped"),
        }
    }

    pub fn handle_envelope(&mut self, envelope: Envelope<R::Board>, now: Instant) {
        if envelope.from == self.local || self.reconnect.is_abandoned() {
            return;
        }
        tracing::trace!(from = %envelope.from, kind = envelope.message.label(), "message received");

        match envelope.message {
            SyncMessage::Hello {
                player,
                reply_requested,
            } => {
                self.peer_joined(player, now);
                if reply_requested {
                    self.send(
                        SyncMessage::Hello {
                            player: self.local,
                            reply_requested: false,
                        },
                        None,
                    );
                }
            }
            SyncMessage::Goodbye { player } => self.peer_left(player),
            SyncMessage::Command(command) => {
                self.peer_joined(envelope.from, now);
                self.receive_command(command, now);
            }
            SyncMessage::Ack { issuer, through } => {
                if issuer == self.local {
                    self.acknowledged(through);
                }
            }
            SyncMessage::SnapshotRequest {
                requester,
                turn_index,
            } => {
                self.peer_joined(requester, now);
                self.answer_snapshot_request(requester, turn_index);
            }
            SyncMessage::Snapshot { to, snapshot } => {
                if to == self.local {
                    self.receive_snapshot(snapshot, now);
                }
            }
        }
        self.flush_outbox(now);
    }

    /// Presence: `peer` is on the channel.
    pub fn peer_joined(&mut self, peer: PlayerId, now: Instant) {
        if peer == self.local {
            return;
        }
        match self.room.peer_joined(peer) {
            Ok(true) => {
                self.session.set_remote(peer);
                self.emit(SyncEvent::Presence {
                    peer,
                    present: true,
                });
                // Commands held while the seat was empty go out now.
                self.flush_outbox(now);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, %peer, "presence ignored");
                return;
            }
        }
        self.reconnect.remote_present(now);
    }

    /// Presence: `peer` left the channel. Unacknowledged commands are
    /// held, not resent, until someone is back.
    pub fn peer_left(&mut self, peer: PlayerId) {
        if self.room.peer_left(peer) {
            self.reconnect.remote_absent();
            self.emit(SyncEvent::Presence {
                peer,
                present: false,
            });
        }
    }

    /// The channel dropped. Sending freezes until the next resync; local
    /// state is kept.
    pub fn on_channel_lost(&mut self, now: Instant) {
        if self.reconnect.link_lost(now) {
            self.sender.pause();
            self.inbound.suspend_gaps();
            self.outgoing.clear();
            self.report_link();
        }
    }

    pub fn connect_succeeded(&mut self, now: Instant) {
        if self.reconnect.attempt_succeeded(now) {
            self.report_link();
            self.send(
                SyncMessage::Hello {
                    player: self.local,
                    reply_requested: true,
                },
                None,
            );
            self.flush_outbox(now);
        }
    }

    pub fn connect_failed(&mut self, now: Instant) {
        self.reconnect.attempt_failed(now);
    }

    pub fn publish_succeeded(&mut self, command_seq: Option<u64>) {
        if let Some(seq) = command_seq {
            self.sender.transmit_succeeded(seq);
        }
    }

    /// A publish failed. Command frames are retried on the send policy;
    /// anything else is dropped (presence and acks are repeated anyway).
    pub fn publish_failed(&mut self, command_seq: Option<u64>, now: Instant) {
        let Some(seq) = command_seq else {
            return;
        };
        if let Transmission::Exhausted {
            ticket,
            id,
            attempts,
        } = self.sender.transmit_failed(seq, now)
        {
            self.emit(SyncEvent::Refused {
                ticket: Some(ticket),
                error: SyncError::DeliveryFailed { id, attempts },
            });
        }
    }

    // -- Time ------------------------------------------------------------

    /// Runs every timer due at `now`: gap timeouts, connect attempts,
    /// snapshot requests, send retries.
    pub fn poll(&mut self, now: Instant) -> Option<LinkDirective> {
        if self.reconnect.is_abandoned() {
            return None;
        }

        if self.reconnect.is_connected() {
            let state = Arc::clone(self.executor.state());
            if let Some((issuer, expected)) = self.inbound.expired_gap(now, |p| state.last_applied_for(p)) {
                tracing::warn!(error = %SyncError::GapTimeout { issuer, expected }, "resyncing");
                self.start_gap_resync(now);
            }
        }

        let directive = match self.reconnect.poll(now) {
            ReconnectAction::Idle | ReconnectAction::WaitUntil(_) => None,
            ReconnectAction::Attempt { attempt } => {
                self.report_link();
                Some(LinkDirective::Connect { attempt })
            }
            ReconnectAction::RequestSnapshot { attempt } => {
                self.request_snapshot(attempt, now);
                None
            }
            ReconnectAction::GiveUp { attempts } => {
                self.abandon(attempts);
                None
            }
        };
        self.flush_outbox(now);
        directive
    }

    /// When [`poll`](Self::poll) next has work, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.reconnect.is_abandoned() {
            return None;
        }
        let mut deadlines = vec![self.reconnect.next_deadline()];
        if self.can_send_commands() {
            deadlines.push(self.sender.next_deadline());
        }
        if self.reconnect.is_connected() {
            deadlines.push(self.inbound.next_deadline());
        }
        deadlines.into_iter().flatten().min()
    }

    // -- Output ----------------------------------------------------------

    /// Frames to publish, in order.
    pub fn take_outgoing(&mut self) -> Vec<OutboundFrame> {
        self.outgoing.drain(..).collect()
    }

    /// Events since the last drain, in the order they happened.
    pub fn drain_events(&mut self) -> Vec<SyncEvent<R::Board>> {
        self.events.drain(..).collect()
    }

    // -- Internals -------------------------------------------------------

    fn link_up(&self) -> bool {
        matches!(self.reconnect.state(), LinkState::Connected | LinkState::Resyncing)
    }

    /// Commands only go out while someone is there to acknowledge them.
    fn can_send_commands(&self) -> bool {
        self.link_up() && self.room.remote().is_some()
    }

    /// The turn a new draft should claim: the current one, plus one for
    /// every turn-bound draft queued ahead of it.
    fn projected_turn(&self) -> u64 {
        let ahead = self
            .sender
            .drafts()
            .filter(|d| !d.action.kind().is_any_time())
            .count() as u64;
        self.executor.turn_index() + ahead
    }

    fn receive_command(&mut self, command: GameCommand, now: Instant) {
        let issuer = command.issuer();
        if issuer == self.local {
            tracing::debug!(id = %command.id(), "own command echoed back, ignored");
            return;
        }
        let high_water = self.executor.state().last_applied_for(issuer);
        match self.inbound.offer(command, high_water, now) {
            Offer::Ready => self.drain_inbound(issuer, now),
            Offer::Buffered => {}
            Offer::Duplicate => {
                // The sender is resending because our ack got lost.
                self.send(
                    SyncMessage::Ack {
                        issuer,
                        through: high_water,
                    },
                    None,
                );
            }
            Offer::Overflow => self.start_gap_resync(now),
        }
    }

    /// Executes `issuer`'s commands for as long as the next one is held,
    /// then acknowledges them.
    fn drain_inbound(&mut self, issuer: PlayerId, now: Instant) {
        let mut consumed = false;
        loop {
            let high_water = self.executor.state().last_applied_for(issuer);
            let Some(command) = self.inbound.pop_next(issuer, high_water, now) else {
                break;
            };
            consumed = true;
            match self.executor.execute(&command, Origin::Remote) {
                ApplyOutcome::Applied { .. } => self.state_changed(),
                ApplyOutcome::Duplicate | ApplyOutcome::Stale { .. } => {}
                ApplyOutcome::Rejected(reason) => {
                    tracing::warn!(id = %command.id(), %reason, "remote command rejected");
                }
            }
        }
        if consumed {
            let through = self.executor.state().last_applied_for(issuer);
            self.send(SyncMessage::Ack { issuer, through }, None);
        }
    }

    fn acknowledged(&mut self, through: u64) {
        for (_, id) in self.sender.acknowledge(through) {
            self.emit(SyncEvent::Delivered { id });
        }
    }

    fn answer_snapshot_request(&mut self, requester: PlayerId, their_turn: u64) {
        let snapshot = self.snapshots.take_snapshot(self.executor.state());
        tracing::info!(%requester, their_turn, turn = snapshot.turn_index, "answering snapshot request");
        self.send(
            SyncMessage::Snapshot {
                to: requester,
                snapshot,
            },
            None,
        );
    }

    fn request_snapshot(&mut self, attempt: u32, now: Instant) {
        // Unacknowledged commands go first so the answer is likely to
        // include them.
        self.sender.republish_all(now);
        self.flush_outbox(now);
        let turn_index = self.executor.turn_index();
        tracing::info!(attempt, turn_index, reason = ?self.reconnect.reason(), "requesting snapshot");
        self.send(
            SyncMessage::SnapshotRequest {
                requester: self.local,
                turn_index,
            },
            None,
        );
    }

    /// Applies a snapshot, then puts back everything local the snapshot
    /// does not contain: unacknowledged commands first, drafts after.
    fn receive_snapshot(&mut self, snapshot: Snapshot<R::Board>, now: Instant) {
        if self.reconnect.state() != LinkState::Resyncing {
            tracing::debug!(turn = snapshot.turn_index, "unsolicited snapshot ignored");
            return;
        }

        let covered = snapshot.last_applied.get(&self.local).copied().unwrap_or(0);
        if let Err(e) = self.snapshots.apply_snapshot(snapshot, &mut self.executor) {
            tracing::warn!(error = %e, "snapshot refused");
            self.reconnect.snapshot_refused(now);
            self.emit(SyncEvent::Refused {
                ticket: None,
                error: SyncError::Snapshot(e),
            });
            return;
        }
        self.state_changed();

        self.sender.resume_after(covered);
        self.acknowledged(covered);
        for command in self.sender.unacked_after(covered) {
            if self.executor.execute(&command, Origin::Local).is_applied() {
                self.state_changed();
            }
        }
        for issuer in self.inbound.issuers() {
            self.drain_inbound(issuer, now);
        }
        self.replay_drafts(now);

        if self.reconnect.snapshot_applied() {
            self.session.record_sync(self.executor.turn_index());
            self.report_link();
        }
    }

    fn replay_drafts(&mut self, now: Instant) {
        for draft in self.sender.take_drafts() {
            let ticket = draft.ticket;
            let current = self.executor.turn_index();
            let any_time = draft.action.kind().is_any_time();
            if !any_time && draft.turn_index < current {
                tracing::info!(%ticket, claimed = draft.turn_index, current, "draft obsolete");
                self.emit(SyncEvent::Refused {
                    ticket: Some(ticket),
                    error: SyncError::Obsolete {
                        ticket,
                        claimed: draft.turn_index,
                        current,
                    },
                });
                continue;
            }

            let claim = if any_time { current } else { draft.turn_index };
            let candidate = GameCommand::new(
                self.local,
                self.sender.next_seq(),
                claim,
                draft.action.clone(),
                draft.created_at,
            );
            match self.executor.check(&candidate, Origin::Local) {
                Verdict::Accept => {
                    let command = self.sender.seal_draft(draft, claim);
                    if self.executor.execute(&command, Origin::Local).is_applied() {
                        self.state_changed();
                    }
                    self.sender.release(command.seq(), now);
                    self.emit(SyncEvent::Accepted {
                        ticket,
                        id: command.id(),
                    });
                }
                Verdict::Reject(reason) => {
                    tracing::info!(%ticket, %reason, "draft rejected on replay");
                    self.emit(SyncEvent::Refused {
                        ticket: Some(ticket),
                        error: SyncError::Rejected(reason),
                    });
                }
                Verdict::Stale { current_turn } => {
                    self.emit(SyncEvent::Refused {
                        ticket: Some(ticket),
                        error: SyncError::Obsolete {
                            ticket,
                            claimed: claim,
                            current: current_turn,
                        },
                    });
                }
                // A fresh sequence number is never consumed already.
                Verdict::Duplicate => {
                    tracing::error!(%ticket, seq = candidate.seq(), "fresh draft judged duplicate");
                    self.emit(SyncEvent::Refused {
                        ticket: Some(ticket),
                        error: SyncError::Rejected(RejectReason::Rules(
                            "sequence number already consumed".into(),
                        )),
                    });
                }
            }
        }
    }

    fn start_gap_resync(&mut self, now: Instant) {
        if self.reconnect.gap_detected(now) {
            self.inbound.suspend_gaps();
            self.report_link();
        }
    }

    fn abandon(&mut self, attempts: u32) {
        self.sender.pause();
        self.outgoing.clear();
        self.report_link();
        for ticket in self.sender.cancel_drafts() {
            self.emit(SyncEvent::Refused {
                ticket: Some(ticket),
                error: SyncError::Abandoned { attempts },
            });
        }
        self.emit(SyncEvent::Refused {
            ticket: None,
            error: SyncError::Abandoned { attempts },
        });
    }

    fn cancelled(&mut self, ticket: Ticket) {
        self.emit(SyncEvent::Refused {
            ticket: Some(ticket),
            error: SyncError::Cancelled(ticket),
        });
    }

    fn state_changed(&mut self) {
        let state = Arc::clone(self.executor.state());
        self.snapshots.maybe_checkpoint(&state);
        if self.reconnect.is_connected() {
            self.session.record_sync(state.turn_index);
        }
        self.emit(SyncEvent::StateChanged {
            turn_index: state.turn_index,
            state,
        });
    }

    fn report_link(&mut self) {
        let link = self.reconnect.state();
        if link == self.reported_link {
            return;
        }
        self.reported_link = link;
        self.emit(SyncEvent::Link(link));

        let status = ChannelStatus::from(link);
        if status != self.session.status {
            self.session.status = status;
            self.emit(SyncEvent::ConnectionStatus(status));
        }
    }

    fn flush_outbox(&mut self, now: Instant) {
        if !self.can_send_commands() {
            return;
        }
        for command in self.sender.take_due(now) {
            let seq = command.seq();
            self.send(SyncMessage::Command(command), Some(seq));
        }
    }

    fn send(&mut self, message: SyncMessage<R::Board>, command_seq: Option<u64>) {
        let label = message.label();
        let envelope = Envelope::new(self.local, unix_millis(), message);
        match self.codec.encode(&envelope) {
            Ok(bytes) => self.outgoing.push_back(OutboundFrame {
                bytes,
                label,
                command_seq,
            }),
            Err(e) => tracing::error!(error = %e, kind = label, "failed to encode message"),
        }
    }

    fn emit(&mut self, event: SyncEvent<R::Board>) {
        tracing::trace!(event = event.label(), "sync event");
        self.events.push_back(event);
    }
}

impl<R: RulesEngine> std::fmt::Debug for SyncManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("local", &self.local)
            .field("link", &self.reconnect.state())
            .field("turn_index", &self.executor.turn_index())
            .field("pending", &self.sender.pending_count())
            .field("drafts", &self.sender.draft_count())
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use duelsync_protocol::MatchPhase;
    use duelsync_room::RoomConfig;

    use super::*;
    use crate::testing::{Alternating, FreeForAll, P1, P2, step};

    fn manager<R: RulesEngine>(id: PlayerId, now: Instant) -> SyncManager<R> {
        let mut room = RoomManager::new(id, RoomConfig::default());
        room.join_room("ABC234").unwrap();
        SyncManager::new(&[P1, P2], room, SyncConfig::default(), now).unwrap()
    }

    /// Runs the handshake between two fresh managers.
    fn pair<R: RulesEngine>(now: Instant) -> (SyncManager<R>, SyncManager<R>) {
        let mut a = manager::<R>(P1, now);
        let mut b = manager::<R>(P2, now);
        for _ in 0..8 {
            for m in [&mut a, &mut b] {
                if let Some(LinkDirective::Connect { .. }) = m.poll(now) {
                    m.connect_succeeded(now);
                }
            }
            for frame in a.take_outgoing() {
                b.handle_bytes(&frame.bytes, now);
            }
            for frame in b.take_outgoing() {
                a.handle_bytes(&frame.bytes, now);
            }
        }
        assert!(a.reconnect.is_connected() && b.reconnect.is_connected());
        a.drain_events();
        b.drain_events();
        (a, b)
    }

    // =====================================================================
    // submit
    // =====================================================================

    #[test]
    fn test_new_without_room_is_error() {
        let room = RoomManager::new(P1, RoomConfig::default());
        let result = SyncManager::<Alternating>::new(&[P1, P2], room, SyncConfig::default(), Instant::now());
        assert!(matches!(result, Err(RoomError::NotInRoom(_))));
    }

    #[test]
    fn test_submit_out_of_turn_is_rejected_without_side_effects() {
        let now = Instant::now();
        let (_a, mut b) = pair::<Alternating>(now);

        let result = b.submit(step(), now);
        assert!(matches!(result, Err(SyncError::Rejected(RejectReason::Rules(_)))));
        assert_eq!(b.sender.next_seq(), 1);
        assert!(b.take_outgoing().is_empty());
        assert!(b.drain_events().is_empty());
    }

    #[test]
    fn test_submit_after_concede_is_match_finished() {
        let now = Instant::now();
        let (mut a, _b) = pair::<Alternating>(now);

        a.submit(Action::Concede, now).unwrap();
        assert_eq!(a.state().phase, MatchPhase::Finished { winner: Some(P2) });
        assert_eq!(
            a.submit(step(), now).unwrap_err(),
            SyncError::Rejected(RejectReason::MatchFinished)
        );
    }

    #[test]
    fn test_any_time_action_does_not_advance_turn() {
        let now = Instant::now();
        let (_a, mut b) = pair::<Alternating>(now);

        let receipt = b
            .submit(Action::DebugAdjust { target: P2, delta: 5 }, now)
            .unwrap();
        assert!(matches!(receipt, Receipt::Applied { turn_index: 0, .. }));
        assert_eq!(b.state().board.credits[&P2], 5);
        assert_eq!(b.state().last_applied_for(P2), 1);
    }

    // =====================================================================
    // Drafts
    // =====================================================================

    #[test]
    fn test_drafts_claim_projected_turns() {
        let now = Instant::now();
        let mut a = manager::<FreeForAll>(P1, now);

        for action in [step(), Action::Concede, step()] {
            assert!(matches!(a.submit(action, now), Ok(Receipt::Queued { .. })));
        }
        let claims: Vec<u64> = a.sender.drafts().map(|d| d.turn_index).collect();
        assert_eq!(claims, vec![0, 1, 1]);
        assert_eq!(a.sender.next_seq(), 1);
    }

    #[test]
    fn test_cancel_drafts_returns_every_ticket() {
        let now = Instant::now();
        let mut a = manager::<FreeForAll>(P1, now);
        let first = a.submit(step(), now).unwrap().ticket();
        let second = a.submit(step(), now).unwrap().ticket();

        assert_eq!(a.cancel_drafts(), vec![first, second]);
        assert_eq!(a.draft_count(), 0);
        assert!(!a.cancel(first));
    }

    #[test]
    fn test_leave_twice_is_not_in_room_and_says_goodbye_once() {
        let now = Instant::now();
        let (mut a, _b) = pair::<FreeForAll>(now);

        a.leave().unwrap();
        assert!(matches!(a.leave(), Err(RoomError::NotInRoom(P1))));

        let goodbyes = a
            .take_outgoing()
            .iter()
            .filter(|f| f.label == "goodbye")
            .count();
        assert_eq!(goodbyes, 1);
    }

    #[test]
    fn test_cancel_reports_each_draft_as_cancelled() {
        let now = Instant::now();
        let mut a = manager::<FreeForAll>(P1, now);
        let first = a.submit(step(), now).unwrap().ticket();
        let second = a.submit(step(), now).unwrap().ticket();
        a.drain_events();

        assert!(a.cancel(first));
        a.cancel_drafts();
        assert!(!a.cancel(first));

        let cancelled: Vec<_> = a
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Refused {
                    ticket: Some(t),
                    error: SyncError::Cancelled(c),
                } if t == c => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled, vec![first, second]);
    }

    // =====================================================================
    // Channel input
    // =====================================================================

    #[test]
    fn test_garbage_bytes_are_dropped() {
        let now = Instant::now();
        let (mut a, _b) = pair::<FreeForAll>(now);
        a.handle_bytes(b"{not json", now);
        assert!(a.take_outgoing().is_empty());
        assert!(a.drain_events().is_empty());
    }

    #[test]
    fn test_own_echo_is_ignored() {
        let now = Instant::now();
        let (mut a, _b) = pair::<FreeForAll>(now);
        a.submit(step(), now).unwrap();
        for frame in a.take_outgoing() {
            a.handle_bytes(&frame.bytes, now);
        }
        assert_eq!(a.turn_index(), 1);
        assert!(a.take_outgoing().is_empty());
    }

    #[test]
    fn test_unsolicited_snapshot_is_ignored() {
        let now = Instant::now();
        let (mut a, b) = pair::<FreeForAll>(now);
        let mut ahead = (**b.state()).clone();
        ahead.turn_index = 7;
        let snapshot = Snapshot::capture(&ahead);

        a.handle_envelope(Envelope::new(P2, 0, SyncMessage::Snapshot { to: P1, snapshot }), now);
        assert_eq!(a.turn_index(), 0);
    }

    #[test]
    fn test_checkpoint_taken_on_interval() {
        let now = Instant::now();
        let (mut a, _b) = pair::<FreeForAll>(now);
        for _ in 0..10 {
            a.submit(step(), now).unwrap();
        }
        assert_eq!(a.snapshots().latest().map(|s| s.turn_index), Some(10));
        assert_eq!(a.session().last_synced_turn_index, 10);
    }
}
