//! Per-connection relay worker.
//!
//! Each accepted connection gets one [`Relay`]. It reads messages from its
//! own connection and forwards every one of them to all other registered
//! connections, until the connection fails, the peer closes, or the server
//! shuts down. It then retires: it removes itself from the registry and closes
//! its own connection. Nothing else ever retires a connection.
//!
//! Forwarding only queues each message on the other peers' writers, so a
//! relay never waits on another connection's socket.

use crate::frame::MessageReader;
use crate::registry::{ConnectionId, Message, Peer};
use crate::server::ChatRelay;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Relay worker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for the next inbound message.
    Reading,
    /// Queueing a message for the other peers.
    Forwarding,
    /// Deregistering and closing. Terminal.
    Retiring,
}

/// Why a relay worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// The peer closed its side (zero-length read).
    PeerClosed,
    /// Reading from the connection failed.
    ReadFailed(std::io::ErrorKind),
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetireReason::PeerClosed => f.write_str("peer closed"),
            RetireReason::ReadFailed(kind) => write!(f, "read failed: {kind}"),
            RetireReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Pumps messages from one connection into every other connection.
pub struct Relay {
    server: Arc<ChatRelay>,
    peer: Peer,
    state: RelayState,
}

impl Relay {
    /// Create a relay for a connection that is already registered as `peer`.
    pub fn new(server: Arc<ChatRelay>, peer: Peer) -> Self {
        Self {
            server,
            peer,
            state: RelayState::Reading,
        }
    }

    /// Registry id of the connection this relay owns.
    pub fn id(&self) -> ConnectionId {
        self.peer.id()
    }

    /// Current state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Read from `reader` until the connection ends, then retire.
    ///
    /// `reader` is the read half of the connection registered as this relay's
    /// peer. Retirement happens exactly once, on this single exit path.
    pub async fn run<R>(mut self, reader: R, shutdown: CancellationToken) -> RetireReason
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = MessageReader::new(reader, self.server.config().server.framing);
        tracing::info!("Client connected: {} ({})", self.peer.id(), self.peer.addr());

        let reason = loop {
            debug_assert_eq!(self.state, RelayState::Reading);
            let next = tokio::select! {
                _ = shutdown.cancelled() => break RetireReason::Shutdown,
                next = reader.next_message() => next,
            };

            match next {
                Ok(Some(message)) => {
                    self.state = RelayState::Forwarding;
                    self.forward(message.into());
                    self.state = RelayState::Reading;
                }
                Ok(None) => break RetireReason::PeerClosed,
                Err(e) => {
                    tracing::debug!("Read error on {}: {}", self.peer.id(), e);
                    break RetireReason::ReadFailed(e.kind());
                }
            }
        };

        self.state = RelayState::Retiring;
        self.retire(reason);
        reason
    }

    /// Queue `message` for every registered peer except this one.
    ///
    /// A peer whose queue is full or whose writer has stopped misses the
    /// message; that is counted and skipped. A peer whose writes fail is
    /// retired by its own relay once its read side notices.
    fn forward(&self, message: Message) {
        let metrics = self.server.metrics();
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics
            .bytes_received
            .fetch_add(message.len() as u64, Ordering::Relaxed);

        let peers = self.server.registry().snapshot_except(self.peer.id());
        tracing::debug!(
            "Relaying {} bytes from {} to {} peer(s)",
            message.len(),
            self.peer.id(),
            peers.len()
        );

        for peer in &peers {
            match peer.send(message.clone()) {
                Ok(()) => {
                    metrics.deliveries_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Dropped message for {}: {}", peer.id(), e);
                }
            }
        }
    }

    fn retire(&self, reason: RetireReason) {
        if self.server.registry().remove(self.peer.id()).is_none() {
            tracing::warn!("{} was already unregistered", self.peer.id());
        }
        self.peer.close();
        self.server
            .metrics()
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            "Client disconnected: {} ({}, remaining: {})",
            self.peer.id(),
            reason,
            self.server.registry().len()
        );
    }
}
