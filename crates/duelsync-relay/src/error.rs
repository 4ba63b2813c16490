//! Error type for the relay.

use duelsync_protocol::ProtocolError;
use duelsync_transport::TransportError;

/// Why a relay connection (or the relay itself) stopped.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection closed or went quiet before subscribing.
    #[error("handshake failed: {0}")]
    Handshake(String),
}
