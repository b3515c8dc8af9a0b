//! Connection registry.
//!
//! The registry is the set of connections that have been accepted and not yet
//! retired. It is the only state shared between the acceptor and the relay
//! workers. Membership lives in a [`DashMap`], so every insert, removal and
//! per-entry read is atomic with respect to the others and no caller has to
//! hold a lock of its own.
//!
//! Broadcasters never write to a socket themselves. [`Registry::snapshot`]
//! clones cheap [`Peer`] handles out of the map, and a send on a handle only
//! queues the message. Each connection has one [`PeerWriter`] task that owns
//! the write half and drains that queue, so a peer that stops reading stalls
//! nobody but itself.

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Type-erased write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One relayed message, shared by every peer it is queued for.
pub type Message = Arc<[u8]>;

/// Default depth of each peer's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Upper bound on closing a write half after its writer stops.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Process-unique identifier of a registered connection.
///
/// Server-internal only; it never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a message could not be queued for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The peer is not draining its queue fast enough.
    #[error("outbound queue full")]
    QueueFull,
    /// The peer's writer has stopped.
    #[error("peer writer closed")]
    Closed,
}

/// Handle to a registered connection's outbound queue.
///
/// Cloning is cheap; all clones feed the same [`PeerWriter`].
#[derive(Clone)]
pub struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Peer {
    /// Registry identifier of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, for logging.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue one message for this peer. Never waits.
    pub fn send(&self, message: Message) -> Result<(), DeliveryError> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Stop the writer and close the write side of the connection.
    ///
    /// Messages still queued are discarded. Only the relay that owns this
    /// connection calls this, once, while retiring.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Owns a connection's write half and writes queued messages to it in order.
///
/// Whole messages are written one at a time, so bytes of two messages never
/// interleave on the wire.
pub struct PeerWriter {
    id: ConnectionId,
    inbound: mpsc::Receiver<Message>,
    writer: BoxedWriter,
    closed: CancellationToken,
}

impl PeerWriter {
    /// Registry identifier of the connection this writer serves.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write queued messages until the peer is closed, a write fails, or
    /// every [`Peer`] handle is gone. Then shut down the write half.
    pub async fn run(mut self) {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                next = self.inbound.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            // A stalled write is abandoned as soon as the peer is closed.
            let written = tokio::select! {
                _ = self.closed.cancelled() => break,
                written = write_message(&mut self.writer, &message) => written,
            };
            if let Err(e) = written {
                tracing::debug!("Write to {} failed: {}", self.id, e);
                break;
            }
        }

        // Senders see `Closed` from here on.
        self.inbound.close();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Shutdown of {} failed: {}", self.id, e),
            Err(_) => tracing::debug!("Shutdown of {} timed out", self.id),
        }
        tracing::debug!("Writer for {} stopped", self.id);
    }
}

async fn write_message(writer: &mut BoxedWriter, message: &[u8]) -> std::io::Result<()> {
    writer.write_all(message).await?;
    writer.flush().await
}

/// The set of currently active connections.
pub struct Registry {
    next_id: AtomicU64,
    peers: DashMap<ConnectionId, Peer>,
    outbound_queue: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_outbound_queue(DEFAULT_OUTBOUND_QUEUE)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose peers queue up to `depth` messages
    /// each (at least one).
    pub fn with_outbound_queue(depth: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            peers: DashMap::new(),
            outbound_queue: depth.max(1),
        }
    }

    /// Register a connection's write half.
    ///
    /// Always succeeds. Returns the peer handle and the writer that must be
    /// spawned to deliver what is queued on it. Broadcasts that take a
    /// snapshot after this returns will include the new peer.
    pub fn add<W>(&self, addr: SocketAddr, writer: W) -> (Peer, PeerWriter)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, inbound) = mpsc::channel(self.outbound_queue);
        let closed = CancellationToken::new();
        let peer = Peer {
            id,
            addr,
            outbound,
            closed: closed.clone(),
        };
        let peer_writer = PeerWriter {
            id,
            inbound,
            writer: Box::new(writer),
            closed,
        };
        self.peers.insert(id, peer.clone());

        tracing::debug!(
            "Registered {} from {} (total: {})",
            id,
            addr,
            self.peers.len()
        );
        (peer, peer_writer)
    }

    /// Remove a connection.
    ///
    /// Idempotent: returns `None` if the id is not registered. When several
    /// callers race to remove the same id exactly one of them gets the peer.
    pub fn remove(&self, id: ConnectionId) -> Option<Peer> {
        let removed = self.peers.remove(&id).map(|(_, peer)| peer);
        if removed.is_some() {
            tracing::debug!("Unregistered {} (remaining: {})", id, self.peers.len());
        }
        removed
    }

    /// Handles to every registered connection.
    ///
    /// Safe to call while other tasks add and remove. The result reflects
    /// membership while it was being collected, not later changes.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Handles to every registered connection except `exclude`.
    pub fn snapshot_except(&self, exclude: ConnectionId) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|entry| *entry.key() != exclude)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::io::AsyncReadExt;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Register a peer whose writer is dropped unspawned.
    fn add(registry: &Registry) -> Peer {
        registry.add(addr(), tokio::io::sink()).0
    }

    #[test]
    fn add_and_remove() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let peer = add(&registry);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(peer.id()));

        let removed = registry.remove(peer.id()).unwrap();
        assert_eq!(removed.id(), peer.id());
        assert!(registry.is_empty());
        assert!(!registry.contains(peer.id()));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new();
        let peer = add(&registry);

        assert!(registry.remove(peer.id()).is_some());
        assert!(registry.remove(peer.id()).is_none());
        assert!(registry.remove(ConnectionId(999)).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let registry = Registry::new();
        let ids: HashSet<_> = (0..100).map(|_| add(&registry).id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn snapshot_except_excludes_sender() {
        let registry = Registry::new();
        let a = add(&registry);
        let b = add(&registry);
        let c = add(&registry);

        let all: HashSet<_> = registry.snapshot().iter().map(Peer::id).collect();
        assert_eq!(all, HashSet::from([a.id(), b.id(), c.id()]));

        let others: HashSet<_> = registry
            .snapshot_except(a.id())
            .iter()
            .map(Peer::id)
            .collect();
        assert_eq!(others, HashSet::from([b.id(), c.id()]));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_removal() {
        let registry = Registry::new();
        let a = add(&registry);
        let b = add(&registry);

        let snapshot = registry.snapshot_except(a.id());
        registry.remove(b.id());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), b.id());
        assert!(registry.snapshot_except(a.id()).is_empty());
    }

    #[tokio::test]
    async fn writer_delivers_queued_messages_in_order() {
        let registry = Registry::new();
        let (writer, mut reader) = tokio::io::duplex(64);
        let (peer, peer_writer) = registry.add(addr(), writer);

        peer.send(Message::from(&b"alice:hello\n"[..])).unwrap();
        peer.send(Message::from(&b"bob:hi\n"[..])).unwrap();

        // Once every handle is gone the writer drains the queue and stops.
        registry.remove(peer.id());
        drop(peer);
        peer_writer.run().await;

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"alice:hello\nbob:hi\n");
    }

    #[test]
    fn full_queue_rejects_without_waiting() {
        let registry = Registry::with_outbound_queue(2);
        let (peer, _peer_writer) = registry.add(addr(), tokio::io::sink());

        peer.send(Message::from(&b"one"[..])).unwrap();
        peer.send(Message::from(&b"two"[..])).unwrap();
        assert_eq!(
            peer.send(Message::from(&b"three"[..])),
            Err(DeliveryError::QueueFull)
        );
    }

    #[test]
    fn send_after_writer_gone_reports_closed() {
        let registry = Registry::new();
        let peer = add(&registry);
        assert_eq!(
            peer.send(Message::from(&b"hello"[..])),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn close_abandons_stalled_write() {
        let registry = Registry::new();
        // Nobody reads the other end, so the first large write never completes.
        let (writer, _reader) = tokio::io::duplex(64);
        let (peer, peer_writer) = registry.add(addr(), writer);
        let task = tokio::spawn(peer_writer.run());

        peer.send(Message::from(vec![b'x'; 4096])).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        peer.close();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("closed writer should stop")
            .unwrap();
        assert_eq!(
            peer.send(Message::from(&b"late"[..])),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_and_remove_leave_consistent_state() {
        let registry = Arc::new(Registry::new());

        // Long-lived members that stay registered throughout.
        let stable: Vec<_> = (0..10)
            .map(|_| add(&registry).id())
            .collect();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let peer = add(&registry);
                    let _ = registry.snapshot_except(peer.id());
                    assert!(registry.remove(peer.id()).is_some());
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), stable.len());
        let remaining: HashSet<_> = registry.snapshot().iter().map(Peer::id).collect();
        assert_eq!(remaining, stable.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_removals_yield_exactly_one_peer() {
        let registry = Arc::new(Registry::new());
        let id = add(&registry).id();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.remove(id).is_some() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(registry.is_empty());
    }
}
