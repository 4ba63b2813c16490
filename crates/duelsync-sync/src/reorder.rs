//! Inbound reorder buffer.
//!
//! The channel may deliver an issuer's commands in any order, more than
//! once, or not at all. The queue holds early arrivals until their
//! predecessors show up and releases commands strictly in sequence order.
//! A gap that stays open past the timeout, or a buffer that overflows, is
//! the caller's cue to resync.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use duelsync_protocol::{GameCommand, PlayerId};

/// Result of offering one command to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// At or behind the high-water mark, or already buffered.
    Duplicate,
    /// Next in line; [`InboundQueue::pop_next`] will return it.
    Ready,
    /// Ahead of a gap; held until the gap fills.
    Buffered,
    /// The issuer's buffer is full. The command was dropped.
    Overflow,
}

#[derive(Debug, Default)]
struct IssuerQueue {
    pending: BTreeMap<u64, GameCommand>,
    /// When the current gap opened.
    gap_since: Option<Instant>,
}

/// Per-issuer reorder buffers.
#[derive(Debug)]
pub struct InboundQueue {
    capacity: usize,
    gap_timeout: Duration,
    issuers: HashMap<PlayerId, IssuerQueue>,
}

impl InboundQueue {
    pub fn new(capacity: usize, gap_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            gap_timeout,
            issuers: HashMap::new(),
        }
    }

    /// Offers `command`, given its issuer's current high-water mark.
    pub fn offer(&mut self, command: GameCommand, high_water: u64, now: Instant) -> Offer {
        let seq = command.seq();
        if seq <= high_water {
            return Offer::Duplicate;
        }
        let queue = self.issuers.entry(command.issuer()).or_default();
        if queue.pending.contains_key(&seq) {
            return Offer::Duplicate;
        }
        // The awaited command is always admitted: it drains the buffer.
        if seq != high_water + 1 && queue.pending.len() >= self.capacity {
            tracing::warn!(issuer = %command.issuer(), seq, capacity = self.capacity, "reorder buffer overflow");
            return Offer::Overflow;
        }

        queue.pending.insert(seq, command);
        if seq == high_water + 1 {
            Offer::Ready
        } else {
            if queue.gap_since.is_none() {
                queue.gap_since = Some(now);
            }
            tracing::trace!(seq, expected = high_water + 1, "command buffered behind a gap");
            Offer::Buffered
        }
    }

    /// Removes and returns `issuer`'s command `high_water + 1`, if held.
    ///
    /// Once nothing more is ready, the gap timer restarts from `now` if
    /// later commands are still waiting, and stops otherwise.
    pub fn pop_next(&mut self, issuer: PlayerId, high_water: u64, now: Instant) -> Option<GameCommand> {
        let queue = self.issuers.get_mut(&issuer)?;
        // Anything at or behind the mark can never be released.
        while queue.pending.first_key_value().is_some_and(|(&seq, _)| seq <= high_water) {
            queue.pending.pop_first();
        }

        match queue.pending.keys().next().copied() {
            Some(seq) if seq == high_water + 1 => {
                queue.gap_since = None;
                queue.pending.pop_first().map(|(_, command)| command)
            }
            Some(_) => {
                queue.gap_since.get_or_insert(now);
                None
            }
            None => {
                queue.gap_since = None;
                None
            }
        }
    }

    /// The first issuer whose gap has been open for the full timeout, and
    /// the sequence number it is waiting for.
    pub fn expired_gap(&self, now: Instant, high_water: impl Fn(PlayerId) -> u64) -> Option<(PlayerId, u64)> {
        let mut expired: Vec<_> = self
            .issuers
            .iter()
            .filter(|(_, q)| q.gap_since.is_some_and(|since| since + self.gap_timeout <= now))
            .map(|(&issuer, _)| (issuer, high_water(issuer) + 1))
            .collect();
        expired.sort();
        expired.into_iter().next()
    }

    /// When the oldest open gap times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.issuers
            .values()
            .filter_map(|q| q.gap_since)
            .min()
            .map(|since| since + self.gap_timeout)
    }

    /// Stops every gap timer without dropping buffered commands. Used when
    /// a resync takes over.
    pub fn suspend_gaps(&mut self) {
        for queue in self.issuers.values_mut() {
            queue.gap_since = None;
        }
    }

    /// Commands held for `issuer`.
    pub fn buffered(&self, issuer: PlayerId) -> usize {
        self.issuers.get(&issuer).map_or(0, |q| q.pending.len())
    }

    /// Issuers with anything buffered, in id order.
    pub fn issuers(&self) -> Vec<PlayerId> {
        let mut ids: Vec<_> = self
            .issuers
            .iter()
            .filter(|(_, q)| !q.pending.is_empty())
            .map(|(&id, _)| id)
            .collect();
        ids.sort();
        ids
    }
}
