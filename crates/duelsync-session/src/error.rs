//! Error types for the session layer.

/// Errors that can occur while managing a connection session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Every reconnection or resync attempt failed. The match cannot
    /// continue on this link.
    #[error("link abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },
}
