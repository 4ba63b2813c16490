//! Wire protocol for duelsync.
//!
//! This crate defines the values that two peers exchange over the
//! publish/subscribe backend:
//!
//! - **Identity** ([`PlayerId`], [`CommandId`]): who authored what.
//! - **Commands** ([`GameCommand`], [`Action`]): one immutable player action.
//! - **State** ([`GameState`], [`Snapshot`], [`MatchPhase`]): the shared
//!   match state and full-state checkpoints.
//! - **Messages** ([`SyncMessage`], [`Envelope`]): what travels between
//!   peers, and [`RelayFrame`]: what travels between a peer and the relay.
//! - **Codec** ([`Codec`], [`JsonCodec`]): how those values become bytes.
//!
//! The command and snapshot types are the same ones the sync layer uses
//! internally; there is no separate wire-format translation layer.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope / RelayFrame) → Sync (commands, state)
//! ```

mod codec;
mod command;
mod error;
mod message;
mod relay;
mod state;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use command::{Action, ActionKind, GameCommand, Square};
pub use error::ProtocolError;
pub use message::{Envelope, SyncMessage};
pub use relay::{PROTOCOL_VERSION, RelayFrame};
pub use state::{GameState, MatchPhase, Snapshot};
pub use types::{CommandId, PlayerId};
