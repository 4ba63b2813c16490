//! The reconnection state machine.
//!
//! ```text
//!              link lost                  attempt ok
//!  Connected ────────────→ Disconnected ───────────→ Resyncing ──→ Connected
//!     │  ▲                     │   ▲                   │   snapshot
//!     │  │                     ▼   │ attempt failed    │   applied
//!     │  │                Reconnecting{n}              │
//!     │  │                     │ budget spent          │ link lost
//!     │  │                     ▼                       ▼
//!     │  └──────────────── Abandoned           (back to Disconnected)
//!     │  gap detected
//!     └──────────────────→ Resyncing
//! ```
//!
//! The manager is sans-IO: it never sleeps and never connects. The owner
//! calls [`poll`](ReconnectionManager::poll) with the current instant,
//! performs whatever [`ReconnectAction`] comes back, and reports the
//! outcome. [`next_deadline`](ReconnectionManager::next_deadline) tells the
//! owner when to poll again.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{RetryPolicy, SessionError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where the link is in its recovery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Live and in sync.
    Connected,
    /// Lost. Outbound commands are queued; nothing is sent.
    Disconnected,
    /// Trying to re-establish the link. `attempt` is 1-based.
    Reconnecting { attempt: u32 },
    /// Link is back; catching up with the other peer's state.
    Resyncing,
    /// Gave up. Terminal.
    Abandoned,
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

/// Why a resync was started. Logged, and reported in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncReason {
    /// The channel dropped.
    LinkLost,
    /// An inbound gap did not fill in time, or the reorder buffer
    /// overflowed.
    Gap,
}

/// What the owner should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Nothing to do, and no timer needed.
    Idle,
    /// Nothing to do until the given instant.
    WaitUntil(Instant),
    /// Connect and subscribe now, then report through
    /// [`attempt_succeeded`](ReconnectionManager::attempt_succeeded) or
    /// [`attempt_failed`](ReconnectionManager::attempt_failed).
    Attempt { attempt: u32 },
    /// Republish unacknowledged commands and ask the remote peer for a
    /// snapshot. Report through
    /// [`snapshot_applied`](ReconnectionManager::snapshot_applied) or
    /// [`snapshot_refused`](ReconnectionManager::snapshot_refused).
    RequestSnapshot { attempt: u32 },
    /// Every attempt failed. Returned exactly once.
    GiveUp { attempts: u32 },
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Tuning for the reconnection state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Backoff between connect attempts.
    pub reconnect: RetryPolicy,
    /// Backoff between snapshot requests while resyncing.
    pub resync: RetryPolicy,
    /// How long to wait for a snapshot answer before asking again.
    pub snapshot_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::default(),
            resync: RetryPolicy::resync(),
            snapshot_timeout: Duration::from_secs(2),
        }
    }
}

impl ReconnectConfig {
    /// Validates both policies and keeps the snapshot timeout at or above
    /// 50 ms.
    pub fn validated(mut self) -> Self {
        self.reconnect = self.reconnect.validated();
        self.resync = self.resync.validated();
        self.snapshot_timeout = self.snapshot_timeout.max(Duration::from_millis(50));
        self
    }
}

// ---------------------------------------------------------------------------
// ReconnectionManager
// ---------------------------------------------------------------------------

/// Drives one link through loss, reconnection, and resync.
#[derive(Debug)]
pub struct ReconnectionManager {
    config: ReconnectConfig,
    state: LinkState,
    reason: ResyncReason,

    /// Failed or in-flight connect attempts since the link was lost.
    attempts: u32,
    attempt_in_flight: bool,
    next_attempt_at: Instant,

    /// Snapshot requests made in the current resync.
    resync_attempts: u32,
    /// When to (re)send the snapshot request. `None` while waiting for the
    /// remote peer to show up.
    request_due: Option<Instant>,
    remote_known: bool,
    /// Attempts spent on the budget that ran out.
    gave_up_after: u32,
}

impl ReconnectionManager {
    /// A manager for a link that has not been established yet. The first
    /// [`poll`](Self::poll) asks for a connect attempt.
    pub fn new(config: ReconnectConfig, now: Instant) -> Self {
        Self {
            config: config.validated(),
            state: LinkState::Disconnected,
            reason: ResyncReason::LinkLost,
            attempts: 0,
            attempt_in_flight: false,
            next_attempt_at: now,
            resync_attempts: 0,
            request_due: None,
            remote_known: false,
            gave_up_after: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == LinkState::Abandoned
    }

    /// Why the current (or last) resync started.
    pub fn reason(&self) -> ResyncReason {
        self.reason
    }

    /// Fails once the link has been abandoned.
    ///
    /// # Errors
    /// [`SessionError::Abandoned`] with the number of attempts spent.
    pub fn check_usable(&self) -> Result<(), SessionError> {
        if self.is_abandoned() {
            return Err(SessionError::Abandoned {
                attempts: self.gave_up_after,
            });
        }
        Ok(())
    }

    // -- Signals from the owner -----------------------------------------

    /// The channel reported a disconnect. Returns `true` if the state
    /// changed.
    ///
    /// Losing the link mid-resync starts over from `Disconnected`; the
    /// partially received state is simply replaced by the next snapshot.
    pub fn link_lost(&mut self, now: Instant) -> bool {
        match self.state {
            LinkState::Connected | LinkState::Resyncing => {
                tracing::warn!(from = ?self.state, "link lost");
                self.state = LinkState::Disconnected;
                self.reason = ResyncReason::LinkLost;
                self.attempts = 0;
                self.attempt_in_flight = false;
                self.next_attempt_at = now;
                self.resync_attempts = 0;
                self.request_due = None;
                true
            }
            LinkState::Disconnected | LinkState::Reconnecting { .. } | LinkState::Abandoned => false,
        }
    }

    /// Inbound ordering broke down while the link is up. Enters
    /// `Resyncing` directly. Returns `true` if the state changed.
    pub fn gap_detected(&mut self, now: Instant) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }
        tracing::warn!("inbound gap, resyncing");
        self.state = LinkState::Resyncing;
        self.reason = ResyncReason::Gap;
        self.resync_attempts = 0;
        self.request_due = self.remote_known.then_some(now);
        true
    }

    /// The remote peer is present (presence event or hello).
    pub fn remote_present(&mut self, now: Instant) {
        self.remote_known = true;
        if self.state == LinkState::Resyncing && self.request_due.is_none() {
            self.request_due = Some(now);
        }
    }

    /// The remote peer left the channel.
    pub fn remote_absent(&mut self) {
        self.remote_known = false;
        if self.state == LinkState::Resyncing {
            self.request_due = None;
        }
    }

    /// The connect attempt returned by `poll` worked.
    pub fn attempt_succeeded(&mut self, now: Instant) -> bool {
        if !matches!(self.state, LinkState::Reconnecting { .. }) || !self.attempt_in_flight {
            return false;
        }
        tracing::info!(attempt = self.attempts, "link re-established, resyncing");
        self.state = LinkState::Resyncing;
        self.attempt_in_flight = false;
        self.resync_attempts = 0;
        self.request_due = self.remote_known.then_some(now);
        true
    }

    /// The connect attempt returned by `poll` failed. Schedules the next
    /// one after the policy's backoff.
    pub fn attempt_failed(&mut self, now: Instant) {
        if !self.attempt_in_flight {
            return;
        }
        self.attempt_in_flight = false;
        let wait = self.config.reconnect.backoff(self.attempts);
        self.next_attempt_at = now + wait;
        tracing::debug!(attempt = self.attempts, ?wait, "connect attempt failed");
    }

    /// A snapshot from the remote peer was applied. Resync is complete.
    pub fn snapshot_applied(&mut self) -> bool {
        if self.state != LinkState::Resyncing {
            return false;
        }
        tracing::info!(reason = ?self.reason, "resync complete");
        self.state = LinkState::Connected;
        self.resync_attempts = 0;
        self.request_due = None;
        true
    }

    /// A snapshot arrived but would have regressed local state. Asks
    /// again after a backoff; this counts against the resync budget.
    pub fn snapshot_refused(&mut self, now: Instant) {
        if self.state != LinkState::Resyncing {
            return;
        }
        let wait = self.config.resync.backoff(self.resync_attempts.max(1));
        tracing::warn!(attempt = self.resync_attempts, ?wait, "snapshot refused, asking again later");
        self.request_due = self.remote_known.then_some(now + wait);
    }

    // -- Driving ---------------------------------------------------------

    /// Decides what to do at `now`.
    pub fn poll(&mut self, now: Instant) -> ReconnectAction {
        match self.state {
            LinkState::Connected | LinkState::Abandoned => ReconnectAction::Idle,

            LinkState::Disconnected | LinkState::Reconnecting { .. } => {
                if self.attempt_in_flight {
                    return ReconnectAction::Idle;
                }
                if !self.config.reconnect.allows(self.attempts) {
                    return self.abandon(self.attempts);
                }
                if now < self.next_attempt_at {
                    return ReconnectAction::WaitUntil(self.next_attempt_at);
                }
                self.attempts += 1;
                self.attempt_in_flight = true;
                self.state = LinkState::Reconnecting {
                    attempt: self.attempts,
                };
                ReconnectAction::Attempt {
                    attempt: self.attempts,
                }
            }

            LinkState::Resyncing => {
                let Some(due) = self.request_due else {
                    return ReconnectAction::Idle;
                };
                if now < due {
                    return ReconnectAction::WaitUntil(due);
                }
                if !self.config.resync.allows(self.resync_attempts) {
                    return self.abandon(self.resync_attempts);
                }
                self.resync_attempts += 1;
                self.request_due = Some(now + self.config.snapshot_timeout);
                ReconnectAction::RequestSnapshot {
                    attempt: self.resync_attempts,
                }
            }
        }
    }

    /// When `poll` next has something to do, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            LinkState::Disconnected | LinkState::Reconnecting { .. } if !self.attempt_in_flight => {
                Some(self.next_attempt_at)
            }
            LinkState::Resyncing => self.request_due,
            _ => None,
        }
    }

    fn abandon(&mut self, attempts: u32) -> ReconnectAction {
        tracing::warn!(attempts, "giving up on link");
        self.state = LinkState::Abandoned;
        self.gave_up_after = attempts;
        self.attempt_in_flight = false;
        self.request_due = None;
        ReconnectAction::GiveUp { attempts }
    }
}

// =========================================================================
// Tests
// =========================================================================
