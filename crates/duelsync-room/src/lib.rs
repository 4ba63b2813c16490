//! Room lifecycle for duelsync.
//!
//! A room is a short shareable code (`K7M2QX`) that both players type in.
//! The code names the publish/subscribe channel the sync layer uses
//! (`duel/K7M2QX`); there is no server-side room object at all. Each peer
//! keeps its own [`RoomManager`] and learns about the other one from
//! presence events.
//!
//! # Key types
//!
//! - [`RoomCode`]: a validated, normalized room code
//! - [`RoomManager`]: create/join/leave, presence, channel identity
//! - [`RoomState`]: lifecycle state machine
//! - [`RoomConfig`]: code length, player limit, channel prefix

mod code;
mod config;
mod error;
mod manager;

pub use code::RoomCode;
pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use manager::RoomManager;
