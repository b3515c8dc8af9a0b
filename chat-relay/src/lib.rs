//! # chat-relay
//!
//! TCP chat relay server.
//!
//! Every byte sequence a client sends is rebroadcast, verbatim, to every
//! other connected client. The relay keeps no history and knows nothing
//! about names: clients prefix their own `name:` by convention.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────── chat-relay ────────────────┐
//! Client A ──TCP──┤ Relay(A) ─┐                                │
//!                 │           ├──► Registry ── snapshot ──► queue to others
//! Client B ──TCP──┤ Relay(B) ─┤   (DashMap)                    │
//!                 │           │                                │
//! Client C ──TCP──┤ Relay(C) ─┘         ▲                      │
//!                 │                     │ add                  │
//!                 │  accept loop ───────┘ + spawn Relay        │
//!                 └────────────────────────────────────────────┘
//! ```
//!
//! - The accept loop registers each connection, then spawns its [`relay::Relay`].
//! - A relay reads one message at a time and queues it for every other
//!   registered connection. Each connection's own writer task drains its
//!   queue; a full queue or a stopped writer just misses that message.
//! - On EOF, read error or shutdown the relay deregisters itself and closes
//!   its connection, exactly once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod frame;
pub mod http;
pub mod registry;
pub mod relay;
pub mod server;

pub use config::{Config, Framing};
pub use error::{RelayError, Result};
pub use registry::{ConnectionId, DeliveryError, Message, Peer, PeerWriter, Registry};
pub use server::{bind_listener, ChatRelay, RelayMetrics};
