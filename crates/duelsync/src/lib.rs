//! # duelsync
//!
//! Peer-to-peer command synchronization for two-player turn-based games.
//!
//! Each player runs a [`Peer`]: a Tokio task that applies local actions
//! immediately, broadcasts them over an unreliable publish/subscribe
//! [`Channel`](duelsync_transport::Channel), and applies the opponent's
//! actions in order, exactly once. When the link drops, the peer
//! reconnects with backoff, pulls a snapshot from the opponent, and
//! replays whatever it did offline.
//!
//! Games plug in by implementing [`RulesEngine`](duelsync_sync::RulesEngine).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duelsync::prelude::*;
//!
//! // Implement RulesEngine for your game, then:
//! // let mut room = RoomManager::new(PlayerId(1), RoomConfig::default());
//! // let code = room.create_room()?;
//! // let peer = Peer::builder()
//! //     .players(&[PlayerId(1), PlayerId(2)])
//! //     .spawn::<MyGame, _>(WebSocketChannel::new(url, PlayerId(1)), room)?;
//! // let mut events = peer.events();
//! // peer.submit(Action::Pass).await?;
//! ```

mod error;
mod peer;

pub use error::DuelsyncError;
pub use peer::{Peer, PeerBuilder, PeerConfig, PeerHandle};

pub use duelsync_protocol as protocol;
pub use duelsync_room as room;
pub use duelsync_session as session;
pub use duelsync_sync as sync;
pub use duelsync_transport as transport;

/// The types most games need.
pub mod prelude {
    pub use crate::{DuelsyncError, Peer, PeerConfig, PeerHandle};
    pub use duelsync_protocol::{
        Action, ActionKind, CommandId, GameCommand, GameState, MatchPhase, PlayerId, Snapshot,
        Square,
    };
    pub use duelsync_room::{RoomCode, RoomConfig, RoomManager, RoomState};
    pub use duelsync_session::{ChannelStatus, ConnectionSession, LinkState, RetryPolicy};
    pub use duelsync_sync::{
        AuthorityMode, Receipt, RulesEngine, SyncConfig, SyncError, SyncEvent, Ticket,
    };
    pub use duelsync_transport::{Channel, MemoryChannel, MemoryHub, WebSocketChannel};
}
