//! chat-relay binary entry point.
//!
//! Usage:
//! ```bash
//! chat-relay                       # listen on 0.0.0.0:12345
//! chat-relay --port 4000
//! chat-relay --config relay.toml --framing line
//! chat-relay --help
//! ```

use anyhow::{Context, Result};
use chat_relay::http::{health, spawn_http_server};
use chat_relay::{bind_listener, ChatRelay, Config, Framing};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// TCP chat relay: rebroadcasts every message to all other connected clients.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind_address`
    #[arg(long)]
    bind: Option<String>,

    /// Listen port, overrides the port of the listen address
    #[arg(long, short)]
    port: Option<u16>,

    /// Message framing: `chunk` (one read = one message) or `line`
    #[arg(long)]
    framing: Option<Framing>,

    /// Maximum simultaneous connections (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = load_config(&args)?;
    let bind_addr = config.bind_addr()?;

    let listener = bind_listener(bind_addr).await?;
    health::init_start_time();

    let relay = Arc::new(ChatRelay::new(config));

    if relay.config().http.enabled {
        let http_addr = relay.config().http_addr()?;
        spawn_http_server(relay.clone(), http_addr)
            .await
            .context("Failed to start HTTP endpoints")?;
    }

    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    relay.run(listener).await?;
    Ok(())
}

/// Load the config file (if any) and apply command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.set_port(port)?;
    }
    if let Some(framing) = args.framing {
        config.server.framing = framing;
    }
    if let Some(max) = args.max_connections {
        config.limits.max_connections = max;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
