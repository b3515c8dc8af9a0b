//! # chat-client
//!
//! Terminal client for the TCP chat relay.
//!
//! The client connects to a relay, asks for a display name, then at the same
//! time sends every typed line as `name:line` and prints every message the
//! relay forwards from other users. Typing `quit` sends that line and leaves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod duplex;
pub mod error;
pub mod input;

pub use duplex::{run_duplex, DuplexOutcome, ReceiverExit, SenderExit};
pub use error::{ClientError, Result};

use tokio::net::TcpStream;

/// Default relay address.
pub const DEFAULT_SERVER: &str = "127.0.0.1:12345";

/// Connect to the relay at `addr` (`host:port`).
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {} from {}", addr, stream.local_addr()?);
    Ok(stream)
}
