//! # chat-client
//!
//! Terminal chat client for chat-relay.
//!
//! ## Example
//!
//! ```bash
//! # Connect to a local relay and pick a name interactively
//! chat-client
//!
//! # Connect elsewhere with a fixed name
//! chat-client --server 10.0.0.5:12345 --name alice
//! ```

use anyhow::{Context, Result};
use chat_client::input::stdin_lines;
use chat_client::{connect, run_duplex, ReceiverExit, SenderExit, DEFAULT_SERVER};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Terminal client for the TCP chat relay.
#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Relay address (host:port)
    #[arg(long, short, default_value = DEFAULT_SERVER)]
    server: String,

    /// Display name (prompted for when omitted)
    #[arg(long, short)]
    name: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let stream = connect(&cli.server)
        .await
        .context("Not able to connect to server")?;
    eprintln!("Successfully connected to {}", cli.server);

    if cli.name.is_none() {
        eprintln!("Enter your chat name:");
    }

    let mut stdout = tokio::io::stdout();
    let outcome = run_duplex(stream, cli.name, stdin_lines(), &mut stdout).await;

    match (outcome.sender, outcome.receiver) {
        (SenderExit::Quit, _) => eprintln!("Stopping the application.."),
        (SenderExit::WriteFailed, _) => eprintln!("Error sending message.."),
        (_, ReceiverExit::ServerClosed | ReceiverExit::ReadFailed) => {
            eprintln!("Disconnected from server")
        }
        _ => {}
    }

    Ok(())
}

/// Logs go to stderr so they never mix with chat output.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
