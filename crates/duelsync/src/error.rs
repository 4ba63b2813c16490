//! Unified error type for duelsync.

use duelsync_protocol::ProtocolError;
use duelsync_room::RoomError;
use duelsync_sync::SyncError;
use duelsync_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `duelsync` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum DuelsyncError {
    /// A transport-level error (connect, subscribe, publish).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown action kind).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error (bad code, full, not in a room).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A command was refused, or the match cannot continue. An abandoned
    /// link surfaces here as [`SyncError::Abandoned`].
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The peer task is gone; its handle can no longer reach it.
    #[error("peer stopped")]
    PeerStopped,
}
