//! Error types for the room layer.

use duelsync_protocol::PlayerId;

use crate::RoomCode;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The code is empty, the wrong length, or uses characters outside the
    /// room-code alphabet.
    #[error("invalid room code {code:?}: {reason}")]
    InvalidCode { code: String, reason: String },

    /// The room already has its full complement of players.
    #[error("room {0} is full")]
    RoomFull(RoomCode),

    /// This peer is already in a room and must leave it first.
    #[error("player {0} already in room {1}")]
    AlreadyInRoom(PlayerId, RoomCode),

    /// The operation needs a room and this peer is not in one.
    #[error("player {0} is not in a room")]
    NotInRoom(PlayerId),
}
