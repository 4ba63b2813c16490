/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation needs a connected link and there is none.
    #[error("not connected")]
    NotConnected,

    /// Establishing the link failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The backend refused a request (bad version, duplicate subscription).
    #[error("rejected by backend ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A relay frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] duelsync_protocol::ProtocolError),
}
