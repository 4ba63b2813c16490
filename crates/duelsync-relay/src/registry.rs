//! Channel registry: who is subscribed where.
//!
//! Pure bookkeeping. Frames for other connections are pushed into their
//! outboxes; the per-connection writer tasks do the actual sending.

use std::collections::HashMap;

use duelsync_protocol::{PlayerId, RelayFrame};
use duelsync_transport::ConnectionId;
use tokio::sync::mpsc;

/// Frames queued for one connection's writer task.
pub(crate) type Outbox = mpsc::UnboundedSender<RelayFrame>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum RegistryError {
    #[error("channel {0} is full")]
    Full(String),

    #[error("not subscribed to {0}")]
    NotSubscribed(String),
}

impl RegistryError {
    /// The `Error` frame code for this error.
    pub(crate) fn code(&self) -> u16 {
        match self {
            Self::Full(_) => 409,
            Self::NotSubscribed(_) => 403,
        }
    }
}

struct Subscriber {
    peer: PlayerId,
    conn: ConnectionId,
    outbox: Outbox,
}

impl Subscriber {
    fn send(&self, frame: RelayFrame) {
        // A closed outbox means the connection is on its way out; its
        // guard will remove it.
        let _ = self.outbox.send(frame);
    }
}

pub(crate) struct Registry {
    channels: HashMap<String, Vec<Subscriber>>,
    max_subscribers: usize,
}

impl Registry {
    pub(crate) fn new(max_subscribers: usize) -> Self {
        Self {
            channels: HashMap::new(),
            max_subscribers,
        }
    }

    /// Subscribes `peer` (on connection `conn`) to `channel`. Returns the
    /// other peers already there.
    ///
    /// A peer subscribing again from a new connection replaces its old
    /// subscription; the old connection is told so.
    pub(crate) fn subscribe(
        &mut self,
        channel: &str,
        peer: PlayerId,
        conn: ConnectionId,
        outbox: Outbox,
    ) -> Result<Vec<PlayerId>, RegistryError> {
        let max = self.max_subscribers;
        let subs = self.channels.entry(channel.to_string()).or_default();

        if let Some(pos) = subs.iter().position(|s| s.peer == peer) {
            let old = subs.remove(pos);
            if old.conn != conn {
                tracing::info!(%peer, channel, old = %old.conn, new = %conn, "subscription replaced");
                old.send(RelayFrame::Error {
                    code: 409,
                    message: format!("subscription to {channel} replaced by a newer connection"),
                });
            }
        } else if subs.len() >= max {
            tracing::warn!(%peer, channel, "channel full");
            if subs.is_empty() {
                self.channels.remove(channel);
            }
            return Err(RegistryError::Full(channel.to_string()));
        }

        let others: Vec<PlayerId> = subs.iter().map(|s| s.peer).collect();
        for sub in subs.iter() {
            sub.send(RelayFrame::PeerJoined {
                channel: channel.to_string(),
                peer,
            });
        }
        subs.push(Subscriber { peer, conn, outbox });
        tracing::info!(%peer, channel, subscribers = subs.len(), "peer subscribed");
        Ok(others)
    }

    /// Removes `conn`'s subscription to `channel`. Returns `true` if it had
    /// one.
    pub(crate) fn unsubscribe(&mut self, channel: &str, conn: ConnectionId) -> bool {
        let Some(subs) = self.channels.get_mut(channel) else {
            return false;
        };
        let Some(pos) = subs.iter().position(|s| s.conn == conn) else {
            return false;
        };
        let gone = subs.remove(pos);
        for sub in subs.iter() {
            sub.send(RelayFrame::PeerLeft {
                channel: channel.to_string(),
                peer: gone.peer,
            });
        }
        if subs.is_empty() {
            self.channels.remove(channel);
        }
        tracing::info!(peer = %gone.peer, channel, "peer unsubscribed");
        true
    }

    /// Fans `data` out to every subscriber of `channel` except the sender.
    /// Returns how many it went to.
    pub(crate) fn publish(
        &self,
        channel: &str,
        conn: ConnectionId,
        data: &[u8],
    ) -> Result<usize, RegistryError> {
        let subs = self
            .channels
            .get(channel)
            .filter(|subs| subs.iter().any(|s| s.conn == conn))
            .ok_or_else(|| RegistryError::NotSubscribed(channel.to_string()))?;

        let mut delivered = 0;
        for sub in subs.iter().filter(|s| s.conn != conn) {
            sub.send(RelayFrame::Deliver {
                channel: channel.to_string(),
                data: data.to_vec(),
            });
            delivered += 1;
        }
        tracing::trace!(channel, bytes = data.len(), delivered, "published");
        Ok(delivered)
    }

    /// Removes every subscription held by `conn` and tells the remaining
    /// subscribers. Returns the number removed.
    pub(crate) fn drop_connection(&mut self, conn: ConnectionId) -> usize {
        let channels: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.conn == conn))
            .map(|(name, _)| name.clone())
            .collect();
        let count = channels.len();
        for channel in channels {
            self.unsubscribe(&channel, conn);
        }
        count
    }

    pub(crate) fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }
}
