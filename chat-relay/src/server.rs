//! Main ChatRelay server coordination.
//!
//! ChatRelay owns the connection registry, runs the accept loop, and
//! supervises one relay worker per accepted connection.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::registry::{ConnectionId, Registry};
use crate::relay::Relay;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted and registered.
    pub connections_total: AtomicU64,
    /// Connections refused by the admission limit.
    pub connections_rejected: AtomicU64,
    /// Connections retired by their relay worker.
    pub connections_closed: AtomicU64,
    /// Failed accept attempts.
    pub accept_errors: AtomicU64,
    /// Inbound messages read from clients.
    pub messages_received: AtomicU64,
    /// Inbound message bytes.
    pub bytes_received: AtomicU64,
    /// Messages queued for a peer.
    pub deliveries_total: AtomicU64,
    /// Messages dropped for a peer: its queue was full or its writer stopped.
    pub delivery_failures: AtomicU64,
}

/// Main relay server.
pub struct ChatRelay {
    config: Config,
    registry: Registry,
    metrics: RelayMetrics,
    /// Relay workers, tracked so shutdown can wait for them to retire.
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("metrics", &self.metrics)
            .field("workers", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl ChatRelay {
    /// Create a new ChatRelay with the given config.
    pub fn new(config: Config) -> Self {
        Self {
            registry: Registry::with_outbound_queue(config.limits.outbound_queue),
            config,
            metrics: RelayMetrics::default(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the connection registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of currently registered connections.
    pub fn total_connections(&self) -> usize {
        self.registry.len()
    }

    /// Token that stops the accept loop and every relay worker when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Register a connection and spawn its writer and relay worker.
    ///
    /// The connection is in the registry before its worker starts, so the
    /// worker never runs unregistered. Returns `None` if the admission limit
    /// is reached; the halves are then dropped, which closes the connection.
    ///
    /// Only the accept loop calls this, so the limit check and the insert
    /// cannot race with another admission.
    pub fn admit<R, W>(self: &Arc<Self>, addr: SocketAddr, reader: R, writer: W) -> Option<ConnectionId>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if let Some(max) = self.config.max_connections() {
            if self.registry.len() >= max {
                self.metrics
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Connection limit reached ({}), rejecting {}", max, addr);
                return None;
            }
        }

        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);

        let (peer, peer_writer) = self.registry.add(addr, writer);
        let id = peer.id();
        let relay = Relay::new(self.clone(), peer);
        // Spawn the workers - don't block the accept loop
        self.tracker.spawn(peer_writer.run());
        self.tracker.spawn(relay.run(reader, self.shutdown.clone()));
        Some(id)
    }

    /// Accept connections until shutdown, then wait for every worker to retire.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Chat relay listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let (reader, writer) = stream.into_split();
                        self.admit(addr, reader, writer);
                    }
                    Err(e) => {
                        self.metrics.accept_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(
            "Stopped accepting, draining {} connection(s)",
            self.registry.len()
        );
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("All connections retired");
        Ok(())
    }
}

/// Bind the chat listener.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] if the address cannot be bound.
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { addr, source })
}
