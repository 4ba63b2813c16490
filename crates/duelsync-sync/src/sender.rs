//! Outbound side: sequence numbers, drafts, and the pending outbox.
//!
//! A local submission goes through up to three stages:
//!
//! ```text
//! draft (offline, no seq) ──seal──→ pending (seq assigned) ──ack──→ gone
//! ```
//!
//! Sequence numbers are handed out only at seal time, so a cancelled or
//! obsolete draft never leaves a hole in the issuer's stream.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use duelsync_protocol::{Action, CommandId, GameCommand, PlayerId};
use duelsync_session::RetryPolicy;

use crate::Ticket;

/// A submission held while the link is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub ticket: Ticket,
    /// The turn the player meant to act on.
    pub turn_index: u64,
    pub action: Action,
    /// Wall clock at submission, carried into the sealed command.
    pub created_at: u64,
}

/// What happened to a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// Will be published again at the given instant.
    Retrying { at: Instant },
    /// The send policy just ran out. Reported once per budget; the command
    /// stays in the outbox and is retried every ack timeout from then on.
    Exhausted {
        ticket: Ticket,
        id: CommandId,
        attempts: u32,
    },
    /// Not in the outbox (already acknowledged).
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Waiting to be published. `None` means parked until the next
    /// republish.
    Unsent { due: Option<Instant> },
    /// Published; resent if no ack arrives by `resend_at`.
    InFlight { resend_at: Instant },
}

#[derive(Debug)]
struct Pending {
    ticket: Ticket,
    command: GameCommand,
    failures: u32,
    slot: Slot,
}

/// Numbers, holds, and (re)transmits one issuer's commands.
#[derive(Debug)]
pub struct CommandSender {
    issuer: PlayerId,
    policy: RetryPolicy,
    ack_timeout: Duration,
    next_seq: u64,
    next_ticket: u64,
    drafts: VecDeque<Draft>,
    /// Sealed, unacknowledged commands in sequence order.
    outbox: VecDeque<Pending>,
}

impl CommandSender {
    pub fn new(issuer: PlayerId, policy: RetryPolicy, ack_timeout: Duration) -> Self {
        Self {
            issuer,
            policy: policy.validated(),
            ack_timeout,
            next_seq: 1,
            next_ticket: 1,
            drafts: VecDeque::new(),
            outbox: VecDeque::new(),
        }
    }

    pub fn issuer(&self) -> PlayerId {
        self.issuer
    }

    /// The sequence number the next sealed command will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn draft_count(&self) -> usize {
        self.drafts.len()
    }

    /// Sealed commands not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.outbox.len()
    }

    // -- Drafts ----------------------------------------------------------

    /// Holds an action until the link is back.
    pub fn draft(&mut self, turn_index: u64, action: Action, created_at: u64) -> Ticket {
        let ticket = self.issue_ticket();
        tracing::debug!(%ticket, turn_index, kind = %action.kind(), "draft queued");
        self.drafts.push_back(Draft {
            ticket,
            turn_index,
            action,
            created_at,
        });
        ticket
    }

    pub fn drafts(&self) -> impl Iterator<Item = &Draft> {
        self.drafts.iter()
    }

    /// Removes every draft, oldest first, for replay.
    pub fn take_drafts(&mut self) -> Vec<Draft> {
        self.drafts.drain(..).collect()
    }

    /// Drops one draft. Returns `false` if the ticket is not a draft
    /// (unknown, or already sealed; sealed commands cannot be recalled).
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        let before = self.drafts.len();
        self.drafts.retain(|d| d.ticket != ticket);
        before != self.drafts.len()
    }

    /// Drops every draft and returns their tickets.
    pub fn cancel_drafts(&mut self) -> Vec<Ticket> {
        self.drafts.drain(..).map(|d| d.ticket).collect()
    }

    // -- Sealing ---------------------------------------------------------

    /// Builds a command with the next sequence number under a fresh
    /// ticket, and queues it for publishing.
    pub fn seal(&mut self, turn_index: u64, action: Action, timestamp: u64) -> (Ticket, GameCommand) {
        let ticket = self.issue_ticket();
        let command = self.seal_as(ticket, turn_index, action, timestamp);
        (ticket, command)
    }

    /// Seals a draft under its own ticket. `turn_index` is the turn the
    /// command will claim.
    pub fn seal_draft(&mut self, draft: Draft, turn_index: u64) -> GameCommand {
        self.seal_as(draft.ticket, turn_index, draft.action, draft.created_at)
    }

    fn seal_as(&mut self, ticket: Ticket, turn_index: u64, action: Action, timestamp: u64) -> GameCommand {
        let seq = self.next_seq;
        self.next_seq += 1;
        let command = GameCommand::new(self.issuer, seq, turn_index, action, timestamp);
        self.outbox.push_back(Pending {
            ticket,
            command: command.clone(),
            failures: 0,
            slot: Slot::Unsent { due: None },
        });
        command
    }

    /// Moves the counter past `seq` if it is not already. A peer that
    /// reloaded learns its own high-water mark from the first snapshot.
    pub fn resume_after(&mut self, seq: u64) {
        if seq >= self.next_seq {
            tracing::info!(issuer = %self.issuer, from = self.next_seq, to = seq + 1, "sequence counter resumed");
            self.next_seq = seq + 1;
        }
    }

    /// Marks a sealed command as ready to publish immediately.
    pub fn release(&mut self, seq: u64, now: Instant) {
        if let Some(entry) = self.entry_mut(seq) {
            entry.slot = Slot::Unsent { due: Some(now) };
        }
    }

    // -- Transmission ----------------------------------------------------

    /// Commands due for publishing at `now`, in sequence order. Each is
    /// marked in flight; report the publish result with
    /// [`transmit_succeeded`](Self::transmit_succeeded) or
    /// [`transmit_failed`](Self::transmit_failed).
    pub fn take_due(&mut self, now: Instant) -> Vec<GameCommand> {
        let next_resend = now + self.ack_timeout;
        let mut due = Vec::new();
        for entry in &mut self.outbox {
            let ready = match entry.slot {
                Slot::Unsent { due: Some(at) } => at <= now,
                Slot::Unsent { due: None } => false,
                Slot::InFlight { resend_at } => resend_at <= now,
            };
            if ready {
                entry.slot = Slot::InFlight {
                    resend_at: next_resend,
                };
                due.push(entry.command.clone());
            }
        }
        due
    }

    pub fn transmit_succeeded(&mut self, seq: u64) {
        if let Some(entry) = self.entry_mut(seq) {
            entry.failures = 0;
        }
    }

    /// Schedules a retry after the send policy's backoff. Once the policy
    /// is spent the command falls back to the ack-timeout cadence, so it
    /// keeps going out for as long as the link is up.
    pub fn transmit_failed(&mut self, seq: u64, now: Instant) -> Transmission {
        let policy = self.policy.clone();
        let ack_timeout = self.ack_timeout;
        let Some(entry) = self.entry_mut(seq) else {
            return Transmission::Unknown;
        };
        entry.failures += 1;
        if !policy.allows(entry.failures) {
            let at = now + ack_timeout;
            entry.slot = Slot::Unsent { due: Some(at) };
            if !policy.allows(entry.failures - 1) {
                tracing::debug!(id = %entry.command.id(), attempt = entry.failures, "publish failed again");
                return Transmission::Retrying { at };
            }
            tracing::warn!(id = %entry.command.id(), attempts = entry.failures, "delivery failed, retrying at ack timeout");
            return Transmission::Exhausted {
                ticket: entry.ticket,
                id: entry.command.id(),
                attempts: entry.failures,
            };
        }
        let at = now + policy.backoff(entry.failures);
        entry.slot = Slot::Unsent { due: Some(at) };
        tracing::debug!(id = %entry.command.id(), attempt = entry.failures, "publish failed, retrying");
        Transmission::Retrying { at }
    }

    /// Stops all transmission until [`republish_all`](Self::republish_all).
    /// Called when the link drops.
    pub fn pause(&mut self) {
        for entry in &mut self.outbox {
            entry.slot = Slot::Unsent { due: None };
            entry.failures = 0;
        }
    }

    /// Makes every unacknowledged command due now, with a fresh retry
    /// budget. Called at the start of every resync.
    pub fn republish_all(&mut self, now: Instant) {
        for entry in &mut self.outbox {
            entry.slot = Slot::Unsent { due: Some(now) };
            entry.failures = 0;
        }
    }

    /// Earliest instant [`take_due`](Self::take_due) will return something.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outbox
            .iter()
            .filter_map(|entry| match entry.slot {
                Slot::Unsent { due } => due,
                Slot::InFlight { resend_at } => Some(resend_at),
            })
            .min()
    }

    // -- Acknowledgement -------------------------------------------------

    /// Drops every command up to and including `through`. Returns the ids
    /// (with tickets) of the ones that were still pending.
    pub fn acknowledge(&mut self, through: u64) -> Vec<(Ticket, CommandId)> {
        let mut done = Vec::new();
        while let Some(front) = self.outbox.front() {
            if front.command.seq() > through {
                break;
            }
            if let Some(entry) = self.outbox.pop_front() {
                done.push((entry.ticket, entry.command.id()));
            }
        }
        done
    }

    /// Sealed commands with a sequence number above `after`, in order.
    pub fn unacked_after(&self, after: u64) -> Vec<GameCommand> {
        self.outbox
            .iter()
            .filter(|entry| entry.command.seq() > after)
            .map(|entry| entry.command.clone())
            .collect()
    }

    fn entry_mut(&mut self, seq: u64) -> Option<&mut Pending> {
        self.outbox.iter_mut().find(|entry| entry.command.seq() == seq)
    }

    fn issue_ticket(&mut self) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{P1, step};

    fn sender() -> CommandSender {
        CommandSender::new(P1, RetryPolicy::send(), Duration::from_secs(1))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_seal_assigns_consecutive_seqs() {
        let mut s = sender();
        let (_, a) = s.seal(0, step(), 0);
        let (_, b) = s.seal(1, Action::Pass, 0);
        assert_eq!((a.seq(), b.seq()), (1, 2));
        assert_eq!(a.issuer(), P1);
        assert_eq!(s.pending_count(), 2);
    }

    #[test]
    fn test_drafts_get_no_seq_until_sealed() {
        let mut s = sender();
        let t1 = s.draft(3, step(), 10);
        let t2 = s.draft(4, Action::Pass, 11);
        assert_eq!(s.next_seq(), 1);

        // The first draft is cancelled; the second still gets seq 1.
        assert!(s.cancel(t1));
        let draft = s.take_drafts().pop().unwrap();
        assert_eq!(draft.ticket, t2);
        let command = s.seal_draft(draft, 4);
        assert_eq!(command.seq(), 1);
        assert_eq!(command.client_timestamp(), 11);
    }

    #[test]
    fn test_cancel_unknown_ticket_is_false() {
        let mut s = sender();
        let (sealed, _) = s.seal(0, step(), 0);
        assert!(!s.cancel(sealed));
        assert!(!s.cancel(Ticket(99)));
    }

    #[test]
    fn test_sealed_command_is_not_due_until_released() {
        let t0 = Instant::now();
        let mut s = sender();
        let (_, command) = s.seal(0, step(), 0);
        assert!(s.take_due(t0).is_empty());

        s.release(command.seq(), t0);
        assert_eq!(s.take_due(t0), vec![command]);
        assert!(s.take_due(t0).is_empty(), "in flight until the ack timeout");
    }

    #[test]
    fn test_unacked_command_is_resent_after_ack_timeout() {
        let t0 = Instant::now();
        let mut s = sender();
        let (_, command) = s.seal(0, step(), 0);
        s.release(command.seq(), t0);
        s.take_due(t0);
        s.transmit_succeeded(command.seq());

        assert_eq!(s.next_deadline(), Some(t0 + ms(1_000)));
        assert_eq!(s.take_due(t0 + ms(1_000)).len(), 1);
    }

    #[test]
    fn test_transmit_failed_backs_off_then_exhausts() {
        let t0 = Instant::now();
        let mut s = sender();
        let (_, command) = s.seal(0, step(), 0);
        s.release(command.seq(), t0);

        let mut now = t0;
        let mut outcomes = Vec::new();
        loop {
            assert_eq!(s.take_due(now).len(), 1);
            match s.transmit_failed(command.seq(), now) {
                Transmission::Retrying { at } => {
                    outcomes.push(at - now);
                    now = at;
                }
                Transmission::Exhausted { id, attempts, .. } => {
                    assert_eq!(id, command.id());
                    assert_eq!(attempts, 5);
                    break;
                }
                Transmission::Unknown => panic!("command vanished"),
            }
        }
        assert_eq!(outcomes, vec![ms(100), ms(200), ms(400), ms(800)]);

        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.next_deadline(), Some(now + ms(1_000)));
    }

    #[test]
    fn test_transmit_failed_after_exhaustion_keeps_resending_at_ack_timeout() {
        let t0 = Instant::now();
        let mut s = sender();
        let (_, command) = s.seal(0, step(), 0);
        s.release(command.seq(), t0);

        let mut now = t0;
        let mut exhausted = 0;
        for _ in 0..8 {
            assert_eq!(s.take_due(now).len(), 1, "command stopped going out");
            match s.transmit_failed(command.seq(), now) {
                Transmission::Retrying { at } => now = at,
                Transmission::Exhausted { .. } => {
                    exhausted += 1;
                    now += ms(1_000);
                }
                Transmission::Unknown => panic!("command vanished"),
            }
        }
        assert_eq!(exhausted, 1, "exhaustion is reported once per budget");

        // A later success restores a full budget.
        assert_eq!(s.take_due(now).len(), 1);
        s.transmit_succeeded(command.seq());
        assert_eq!(
            s.transmit_failed(command.seq(), now),
            Transmission::Retrying { at: now + ms(100) }
        );
    }

    #[test]
    fn test_acknowledge_is_cumulative() {
        let mut s = sender();
        for turn in 0..3 {
            s.seal(turn, step(), 0);
        }
        let acked = s.acknowledge(2);
        assert_eq!(
            acked.iter().map(|(_, id)| id.seq).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(s.pending_count(), 1);
        assert!(s.acknowledge(2).is_empty(), "second ack is a no-op");
        assert_eq!(s.unacked_after(0)[0].seq(), 3);
    }

    #[test]
    fn test_pause_parks_in_flight_commands() {
        let t0 = Instant::now();
        let mut s = sender();
        let (_, command) = s.seal(0, step(), 0);
        s.release(command.seq(), t0);
        s.take_due(t0);

        s.pause();
        assert_eq!(s.next_deadline(), None);
        assert!(s.take_due(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn test_resume_after_only_moves_forward() {
        let mut s = sender();
        s.resume_after(7);
        assert_eq!(s.next_seq(), 8);
        s.resume_after(3);
        assert_eq!(s.next_seq(), 8);
    }

    #[test]
    fn test_seqs_never_reused_after_ack() {
        let mut s = sender();
        s.seal(0, step(), 0);
        s.acknowledge(1);
        let (_, next) = s.seal(1, step(), 0);
        assert_eq!(next.seq(), 2);
    }
}
