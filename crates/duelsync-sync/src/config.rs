//! Sync configuration.

use std::time::Duration;

use duelsync_session::{ReconnectConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Who gets to veto a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorityMode {
    /// Both peers run the full rules check on every command, local or
    /// remote. The normal online setting.
    #[default]
    Symmetric,
    /// Remote commands skip the rules hook; ordering and turn checks
    /// still apply. For two peers on the same device, where the other
    /// side already validated.
    TrustRemote,
}

/// Configuration for a [`SyncManager`](crate::SyncManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Out-of-order commands held per issuer before giving up and
    /// resyncing.
    pub reorder_capacity: usize,

    /// How long a sequence gap may stay open before resyncing.
    pub gap_timeout: Duration,

    /// How long a sent command may go unacknowledged before it is sent
    /// again. Resends are harmless: the receiver drops duplicates.
    pub ack_timeout: Duration,

    /// Take a checkpoint every this many turns.
    pub checkpoint_interval: u64,

    /// Checkpoints kept in memory.
    pub retained_checkpoints: usize,

    pub authority: AuthorityMode,

    /// Backoff for publishing one command.
    pub send: RetryPolicy,

    pub reconnect: ReconnectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reorder_capacity: 16,
            gap_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(1),
            checkpoint_interval: 10,
            retained_checkpoints: 4,
            authority: AuthorityMode::Symmetric,
            send: RetryPolicy::send(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - `reorder_capacity`, `checkpoint_interval`, and
    ///   `retained_checkpoints` at least 1.
    /// - `gap_timeout` and `ack_timeout` at least 50 ms.
    pub fn validated(mut self) -> Self {
        self.reorder_capacity = self.reorder_capacity.max(1);
        self.checkpoint_interval = self.checkpoint_interval.max(1);
        self.retained_checkpoints = self.retained_checkpoints.max(1);
        self.gap_timeout = self.gap_timeout.max(Duration::from_millis(50));
        self.ack_timeout = self.ack_timeout.max(Duration::from_millis(50));
        self.send = self.send.validated();
        self.reconnect = self.reconnect.validated();
        self
    }
}
