//! Error types for the protocol layer.
//!
//! Each crate in duelsync defines its own error enum. A `ProtocolError`
//! always means the problem is in building, encoding, or decoding a
//! value, never in networking or game rules.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// message produced by an incompatible build.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The command type is not one of the recognized action kinds, or its
    /// payload does not fit that kind.
    #[error("invalid command {kind:?}: {reason}")]
    InvalidCommand { kind: String, reason: String },

    /// The message is invalid at the protocol level.
    ///
    /// For logical errors that pass deserialization but violate protocol
    /// rules, such as a snapshot whose turn index disagrees with its state.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
