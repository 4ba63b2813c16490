//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The protocol layer doesn't care HOW values are serialized; it just needs
//! something that implements the [`Codec`] trait. Both peers must use the
//! same codec; the relay never decodes peer payloads, only its own frames.
//!
//! Currently we provide [`JsonCodec`]. It is human-readable and, because
//! `serde_json` writes struct fields in declaration order and every map in
//! the state is a `BTreeMap`, encoding the same value twice yields the same
//! bytes. Replays and snapshot comparisons rely on that.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the codec is owned by long-lived async
/// tasks (the peer actor, the relay's connection handlers).
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use duelsync_protocol::{Action, Codec, GameCommand, JsonCodec, PlayerId};
///
/// let codec = JsonCodec;
/// let cmd = GameCommand::new(PlayerId(1), 1, 0, Action::Pass, 1_700_000_000_000);
///
/// let bytes = codec.encode(&cmd).unwrap();
/// let decoded: GameCommand = codec.decode(&bytes).unwrap();
/// assert_eq!(cmd, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
