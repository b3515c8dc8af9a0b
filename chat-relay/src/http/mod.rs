//! HTTP endpoints for chat-relay.
//!
//! Provides health check and metrics endpoints. Disabled unless
//! `http.enabled` is set.

pub mod health;
mod metrics;

use crate::error::{RelayError, Result};
use crate::server::ChatRelay;
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<ChatRelay>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Bind the HTTP listener and serve in the background until the relay shuts
/// down.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] if the address cannot be bound.
pub async fn spawn_http_server(
    relay: Arc<ChatRelay>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { addr, source })?;
    tracing::info!("HTTP endpoints on http://{}", addr);

    let shutdown = relay.shutdown_token();
    let app = build_router(relay);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    }))
}
