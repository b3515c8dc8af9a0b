//! Health check endpoint.

use crate::config::Framing;
use crate::server::ChatRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Record the process start (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `"ok"` while accepting, `"draining"` once shutdown has begun.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Registered connections.
    pub connections: usize,
    /// Admission limit, absent when unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Message framing in use.
    pub framing: Framing,
    /// Messages read from clients since startup.
    pub messages_relayed: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay's current state.
    pub fn of(relay: &ChatRelay) -> Self {
        let draining = relay.shutdown_token().is_cancelled();
        Self {
            status: if draining { "draining" } else { "ok" },
            version: env!("CARGO_PKG_VERSION"),
            connections: relay.total_connections(),
            max_connections: relay.config().max_connections(),
            framing: relay.config().server.framing,
            messages_relayed: relay.metrics().messages_received.load(Ordering::Relaxed),
            uptime_seconds: START_TIME
                .get()
                .map(|start| start.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&relay))
}
