//! In-process publish/subscribe broker with fault injection.
//!
//! [`MemoryHub`] plays the role of the relay for peers living in the same
//! process. Every peer gets its own [`MemoryChannel`] handle. The hub can be
//! told to misbehave in the ways a real network does:
//!
//! | Fault | Method |
//! |-------|--------|
//! | Link drop, refused reconnects | [`partition`](MemoryHub::partition) / [`heal`](MemoryHub::heal) |
//! | Duplicate delivery | [`set_duplicate`](MemoryHub::set_duplicate) |
//! | Reordering | [`hold`](MemoryHub::hold) then [`release_reversed`](MemoryHub::release_reversed) |
//! | Silent loss | [`drop_next`](MemoryHub::drop_next) |
//! | Flaky connects | [`fail_next_connects`](MemoryHub::fail_next_connects) |

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use duelsync_protocol::PlayerId;
use tokio::sync::{Mutex, mpsc};

use crate::{Channel, ChannelEvent, Subscription, TransportError};

struct Subscriber {
    peer: PlayerId,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct Link {
    connected: bool,
    partitioned: bool,
}

/// A delivery parked while the hub is holding.
struct Held {
    to: mpsc::UnboundedSender<ChannelEvent>,
    data: Vec<u8>,
}

#[derive(Default)]
struct HubInner {
    channels: HashMap<String, Vec<Subscriber>>,
    links: HashMap<PlayerId, Link>,
    duplicate: bool,
    holding: bool,
    held: Vec<Held>,
    drop_next: HashMap<PlayerId, usize>,
    failing_connects: HashMap<PlayerId, usize>,
}

impl HubInner {
    /// Marks `peer` offline, closes its subscriptions, and tells everyone
    /// else on those channels that it left.
    fn drop_link(&mut self, peer: PlayerId, reason: &str) {
        if let Some(link) = self.links.get_mut(&peer) {
            link.connected = false;
        }

        for subs in self.channels.values_mut() {
            let before = subs.len();
            subs.retain(|sub| {
                if sub.peer == peer {
                    let _ = sub.tx.send(ChannelEvent::Closed(reason.to_string()));
                    false
                } else {
                    true
                }
            });
            if subs.len() != before {
                for sub in subs.iter() {
                    let _ = sub.tx.send(ChannelEvent::PeerLeft(peer));
                }
            }
        }
        self.channels.retain(|_, subs| !subs.is_empty());
    }

    fn is_online(&self, peer: PlayerId) -> bool {
        self.links
            .get(&peer)
            .is_some_and(|link| link.connected && !link.partitioned)
    }
}

/// The shared broker. Cheap to clone; all clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel handle that publishes as `peer`.
    pub fn channel(&self, peer: PlayerId) -> MemoryChannel {
        MemoryChannel {
            hub: self.clone(),
            peer,
        }
    }

    // -- Fault injection ------------------------------------------------

    /// Cuts `peer` off: its subscriptions close, its publishes fail, and
    /// its connect attempts are refused until [`heal`](Self::heal).
    pub async fn partition(&self, peer: PlayerId) {
        let mut inner = self.inner.lock().await;
        inner.links.entry(peer).or_default().partitioned = true;
        inner.drop_link(peer, "partitioned");
        tracing::debug!(%peer, "memory hub: partitioned");
    }

    /// Lets `peer` connect again. Does not reconnect it.
    pub async fn heal(&self, peer: PlayerId) {
        let mut inner = self.inner.lock().await;
        inner.links.entry(peer).or_default().partitioned = false;
        tracing::debug!(%peer, "memory hub: healed");
    }

    /// When on, every delivery is made twice.
    pub async fn set_duplicate(&self, on: bool) {
        self.inner.lock().await.duplicate = on;
    }

    /// Parks every delivery until [`release`](Self::release) or
    /// [`release_reversed`](Self::release_reversed).
    pub async fn hold(&self) {
        self.inner.lock().await.holding = true;
    }

    /// Delivers parked messages in publish order and stops holding.
    pub async fn release(&self) {
        let held = {
            let mut inner = self.inner.lock().await;
            inner.holding = false;
            std::mem::take(&mut inner.held)
        };
        for h in held {
            let _ = h.to.send(ChannelEvent::Message(h.data));
        }
    }

    /// Delivers parked messages newest first and stops holding.
    pub async fn release_reversed(&self) {
        let held = {
            let mut inner = self.inner.lock().await;
            inner.holding = false;
            std::mem::take(&mut inner.held)
        };
        for h in held.into_iter().rev() {
            let _ = h.to.send(ChannelEvent::Message(h.data));
        }
    }

    /// Silently discards the next `count` publishes from `peer`. The
    /// publisher still sees `Ok`.
    pub async fn drop_next(&self, peer: PlayerId, count: usize) {
        self.inner.lock().await.drop_next.insert(peer, count);
    }

    /// Makes the next `count` connect attempts from `peer` fail.
    pub async fn fail_next_connects(&self, peer: PlayerId, count: usize) {
        self.inner.lock().await.failing_connects.insert(peer, count);
    }

    // -- Inspection -----------------------------------------------------

    /// Number of live subscriptions on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .await
            .channels
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Whether `peer` currently has a working link.
    pub async fn is_connected(&self, peer: PlayerId) -> bool {
        self.inner.lock().await.is_online(peer)
    }

    // -- Operations used by MemoryChannel -------------------------------

    async fn connect(&self, peer: PlayerId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;

        if inner.links.get(&peer).is_some_and(|l| l.partitioned) {
            return Err(TransportError::ConnectFailed("peer is partitioned".into()));
        }
        if let Some(remaining) = inner.failing_connects.get_mut(&peer) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::ConnectFailed("injected failure".into()));
            }
        }

        inner.links.entry(peer).or_default().connected = true;
        tracing::trace!(%peer, "memory hub: connected");
        Ok(())
    }

    async fn subscribe(
        &self,
        peer: PlayerId,
        channel: &str,
    ) -> Result<Subscription, TransportError> {
        let mut inner = self.inner.lock().await;
        if !inner.is_online(peer) {
            return Err(TransportError::NotConnected);
        }

        let (tx, sub) = Subscription::new(channel);
        let subs = inner.channels.entry(channel.to_string()).or_default();

        // A second subscribe from the same peer replaces the first.
        subs.retain(|s| {
            if s.peer == peer {
                let _ = s.tx.send(ChannelEvent::Closed("replaced".into()));
                false
            } else {
                true
            }
        });

        for other in subs.iter() {
            let _ = other.tx.send(ChannelEvent::PeerJoined(peer));
            let _ = tx.send(ChannelEvent::PeerJoined(other.peer));
        }
        subs.push(Subscriber { peer, tx });

        tracing::trace!(%peer, channel, "memory hub: subscribed");
        Ok(sub)
    }

    async fn publish(
        &self,
        peer: PlayerId,
        channel: &str,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if !inner.is_online(peer) {
            return Err(TransportError::NotConnected);
        }

        if let Some(remaining) = inner.drop_next.get_mut(&peer) {
            if *remaining > 0 {
                *remaining -= 1;
                tracing::trace!(%peer, channel, "memory hub: dropped publish");
                return Ok(());
            }
        }

        let copies = if inner.duplicate { 2 } else { 1 };
        let targets: Vec<_> = inner
            .channels
            .get(channel)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.peer != peer)
                    .map(|s| s.tx.clone())
                    .collect()
            })
            .unwrap_or_default();

        for to in targets {
            for _ in 0..copies {
                if inner.holding {
                    inner.held.push(Held {
                        to: to.clone(),
                        data: data.to_vec(),
                    });
                } else {
                    let _ = to.send(ChannelEvent::Message(data.to_vec()));
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self, peer: PlayerId) {
        self.inner.lock().await.drop_link(peer, "disconnected");
        tracing::trace!(%peer, "memory hub: disconnected");
    }
}

/// One peer's handle onto a [`MemoryHub`].
pub struct MemoryChannel {
    hub: MemoryHub,
    peer: PlayerId,
}

impl MemoryChannel {
    /// The peer this handle publishes as.
    pub fn peer(&self) -> PlayerId {
        self.peer
    }
}

impl Channel for MemoryChannel {
    fn connect(&mut self, _channel: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.hub.connect(self.peer)
    }

    fn subscribe(
        &mut self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send {
        self.hub.subscribe(self.peer, channel)
    }

    fn publish(
        &mut self,
        channel: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.hub.publish(self.peer, channel, data)
    }

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            self.hub.disconnect(self.peer).await;
            Ok(())
        }
    }
}
