//! Error types for chat-client.

/// Errors raised while setting up a chat session.
///
/// Once connected, I/O failures end the session instead of surfacing as
/// errors; see [`crate::duplex::DuplexOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the relay.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
