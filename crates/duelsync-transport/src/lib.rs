//! Transport abstraction layer for duelsync.
//!
//! Two sides of the same wire:
//!
//! - **Peer side**: the [`Channel`] trait, a publish/subscribe primitive
//!   with connect/publish/subscribe/disconnect. It makes no promises: messages
//!   can be lost, duplicated, or reordered, and the link can drop at any
//!   time. Everything above this layer is built to tolerate that.
//! - **Backend side**: the [`Listener`] and [`Connection`] traits the relay
//!   uses to accept peers.
//!
//! Implementations:
//!
//! - [`MemoryHub`] / [`MemoryChannel`]: an in-process broker with fault
//!   injection (partition, duplicate delivery, reordering, loss, failing
//!   connects). Used by tests and the demo.
//! - [`WebSocketChannel`]: a peer talking to the relay over WebSocket.
//! - [`WebSocketListener`]: the relay's accept side.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client and listener via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryChannel, MemoryHub};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketChannel, WebSocketConnection, WebSocketListener};

use std::fmt;
use std::future::Future;

use duelsync_protocol::PlayerId;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Peer side
// ---------------------------------------------------------------------------

/// Something that happened on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes another subscriber published.
    Message(Vec<u8>),
    /// Another subscriber is present (already there when we subscribed, or
    /// arrived later).
    PeerJoined(PlayerId),
    /// Another subscriber left or dropped.
    PeerLeft(PlayerId),
    /// The link carrying this subscription is gone. No more events follow.
    Closed(String),
}

/// Receiving half of a channel subscription.
///
/// Wraps an unbounded mpsc receiver so every [`Channel`] implementation
/// hands out the same type.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    /// Creates a subscription and the sender that feeds it.
    pub fn new(channel: impl Into<String>) -> (mpsc::UnboundedSender<ChannelEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                channel: channel.into(),
                rx,
            },
        )
    }

    /// The channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next event.
    ///
    /// A dropped sender is reported as [`ChannelEvent::Closed`], so callers
    /// only ever need to handle one end-of-stream case. Keeps returning
    /// `Closed` after that.
    pub async fn recv(&mut self) -> ChannelEvent {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| ChannelEvent::Closed("subscription dropped".into()))
    }
}

/// An unreliable publish/subscribe link, as seen by one peer.
///
/// Methods return `impl Future + Send` rather than using `async fn` so the
/// peer actor, which is generic over the channel, can be spawned onto a
/// multi-threaded runtime.
pub trait Channel: Send + 'static {
    /// Establishes the link. `channel` names the room channel the caller
    /// intends to use; implementations may ignore it.
    fn connect(&mut self, channel: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribes to `channel`. Requires a connected link.
    fn subscribe(
        &mut self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send;

    /// Publishes `data` to every other subscriber of `channel`.
    ///
    /// `Ok` means the bytes left this peer, not that anyone received them.
    fn publish(
        &mut self,
        channel: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tears the link down. Outstanding subscriptions receive `Closed`.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

// ---------------------------------------------------------------------------
// Backend side
// ---------------------------------------------------------------------------

/// Opaque identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Listener: Send + Sync + 'static {
    /// The connection type produced by this listener.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;
}

/// A single accepted connection that can send and receive bytes.
///
/// `send` and `recv` may run concurrently from different tasks.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
        assert_eq!(id.into_inner(), 7);
    }

    #[tokio::test]
    async fn test_subscription_recv_after_sender_dropped_returns_closed() {
        let (tx, mut sub) = Subscription::new("duel/ABCDEF");
        tx.send(ChannelEvent::Message(vec![1])).unwrap();
        drop(tx);

        assert_eq!(sub.recv().await, ChannelEvent::Message(vec![1]));
        assert!(matches!(sub.recv().await, ChannelEvent::Closed(_)));
        assert!(matches!(sub.recv().await, ChannelEvent::Closed(_)));
    }

    #[test]
    fn test_subscription_remembers_channel() {
        let (_tx, sub) = Subscription::new("duel/XYZ234");
        assert_eq!(sub.channel(), "duel/XYZ234");
    }
}
