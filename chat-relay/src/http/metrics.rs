//! Prometheus metrics endpoint.

use crate::server::{ChatRelay, RelayMetrics};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> impl IntoResponse {
    let body = render(relay.total_connections(), relay.metrics());
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Render gauges (current state) and counters (monotonic since startup) in
/// Prometheus text format.
fn render(connections: usize, m: &RelayMetrics) -> String {
    let counters = [
        (
            "connections_total",
            "Total connections accepted",
            &m.connections_total,
        ),
        (
            "connections_rejected_total",
            "Connections refused by the admission limit",
            &m.connections_rejected,
        ),
        (
            "connections_closed_total",
            "Connections retired",
            &m.connections_closed,
        ),
        ("accept_errors_total", "Failed accept attempts", &m.accept_errors),
        (
            "messages_received_total",
            "Messages read from clients",
            &m.messages_received,
        ),
        (
            "bytes_received_total",
            "Message bytes read from clients",
            &m.bytes_received,
        ),
        (
            "deliveries_total",
            "Messages queued for a peer",
            &m.deliveries_total,
        ),
        (
            "delivery_failures_total",
            "Messages dropped for a peer (queue full or writer stopped)",
            &m.delivery_failures,
        ),
    ];

    let mut body = format!(
        r#"# HELP chat_relay_connections_active Number of registered connections
# TYPE chat_relay_connections_active gauge
chat_relay_connections_active {connections}

# HELP chat_relay_info Server information
# TYPE chat_relay_info gauge
chat_relay_info{{version="{version}"}} 1
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    for (name, help, counter) in counters {
        body.push_str(&format!(
            "\n# HELP chat_relay_{name} {help}\n# TYPE chat_relay_{name} counter\nchat_relay_{name} {}\n",
            counter.load(Ordering::Relaxed)
        ));
    }
    body
}
