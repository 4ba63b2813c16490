//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable holding the bind address.
pub const BIND_ADDR_ENV: &str = "DUELSYNC_RELAY_ADDR";

/// Configuration for a [`RelayServer`](crate::RelayServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address to listen on. Port 0 picks a free one.
    pub bind_addr: String,
    /// A connection that sends nothing (not even a heartbeat) for this
    /// long is dropped.
    pub heartbeat_timeout: Duration,
    /// How long a new connection has to send its first `Subscribe`.
    pub handshake_timeout: Duration,
    /// Distinct peers allowed on one channel.
    pub max_subscribers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            heartbeat_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            max_subscribers: 2,
        }
    }
}

impl RelayConfig {
    /// Defaults, with the bind address taken from `DUELSYNC_RELAY_ADDR`
    /// when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.bind_addr = addr.trim().to_string();
            }
        }
        config
    }

    /// Clamps values so the relay is safe to run.
    ///
    /// - `max_subscribers` at least 2 (a channel is useless otherwise).
    /// - both timeouts at least 100 ms.
    pub fn validated(mut self) -> Self {
        if self.max_subscribers < 2 {
            tracing::warn!(max_subscribers = self.max_subscribers, "max_subscribers below 2; using 2");
            self.max_subscribers = 2;
        }
        let floor = Duration::from_millis(100);
        self.heartbeat_timeout = self.heartbeat_timeout.max(floor);
        self.handshake_timeout = self.handshake_timeout.max(floor);
        self
    }
}
