//! Frames exchanged between a peer and the relay backend.
//!
//! The relay is deliberately thin: it understands channels and presence,
//! never game state. Peer traffic rides inside `Publish`/`Deliver` as opaque
//! bytes (an encoded [`Envelope`](crate::Envelope)).

use serde::{Deserialize, Serialize};

use crate::PlayerId;

/// The current relay protocol version. A `Subscribe` carrying any other
/// version is answered with `Error { code: 400, .. }`.
pub const PROTOCOL_VERSION: u32 = 1;

/// One WebSocket frame between a peer and the relay.
///
/// `#[serde(tag = "type")]` produces `{ "type": "Subscribe", ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayFrame {
    // -- Subscription lifecycle --

    /// Peer → Relay: join `channel` as `peer`.
    Subscribe {
        version: u32,
        channel: String,
        peer: PlayerId,
    },

    /// Relay → Peer: subscription confirmed. `peers` lists the other
    /// subscribers already present.
    Subscribed {
        channel: String,
        peers: Vec<PlayerId>,
    },

    /// Peer → Relay: leave `channel`.
    Unsubscribe { channel: String },

    // -- Traffic --

    /// Peer → Relay: fan `data` out to every other subscriber.
    Publish { channel: String, data: Vec<u8> },

    /// Relay → Peer: bytes another subscriber published.
    Deliver { channel: String, data: Vec<u8> },

    // -- Presence --

    /// Relay → Peer: someone subscribed to a channel you are on.
    PeerJoined { channel: String, peer: PlayerId },

    /// Relay → Peer: someone unsubscribed or dropped.
    PeerLeft { channel: String, peer: PlayerId },

    // -- Keep-alive --

    Heartbeat { client_time: u64 },

    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Errors --

    /// Relay → Peer. `code` follows HTTP conventions (400 bad request,
    /// 409 conflict).
    Error { code: u16, message: String },
}
