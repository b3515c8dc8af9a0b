//! Sender and receiver sharing one connection.
//!
//! The sender turns input lines into `name:line` messages and the receiver
//! prints whatever the relay forwards. Both run concurrently on the same
//! connection. When either one finishes it cancels the other, and
//! [`run_duplex`], which owns the connection, shuts it down once after both
//! have stopped.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Largest chunk read from the relay at once.
///
/// Mirrors the relay's transfer unit (`chat_relay::frame::MAX_MESSAGE_SIZE`).
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Input line that ends the session after it has been sent.
pub const QUIT_COMMAND: &str = "quit";

/// Why the sender stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderExit {
    /// The user typed [`QUIT_COMMAND`].
    Quit,
    /// No more input lines.
    InputClosed,
    /// Writing to the relay failed.
    WriteFailed,
    /// The receiver finished first.
    Cancelled,
}

/// Why the receiver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    /// The relay closed the connection.
    ServerClosed,
    /// Reading from the relay failed.
    ReadFailed,
    /// Writing to the local output failed.
    OutputFailed,
    /// The sender finished first.
    Cancelled,
}

/// How a duplex session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplexOutcome {
    /// Exit of the sending side.
    pub sender: SenderExit,
    /// Exit of the receiving side.
    pub receiver: ReceiverExit,
}

/// Wire form of one chat line.
///
/// The trailing newline lets line-framed relays and terminals split
/// messages. Older clients that print each chunk followed by their own
/// newline will show a blank line after every message from this client.
pub fn format_message(name: &str, line: &str) -> String {
    format!("{name}:{line}\n")
}

/// Run sender and receiver over `stream` until one of them stops.
///
/// The display name is `name` if given, otherwise the first line of `input`.
/// Relay output is written to `output`.
pub async fn run_duplex<S, O>(
    stream: S,
    name: Option<String>,
    mut input: mpsc::Receiver<String>,
    output: &mut O,
) -> DuplexOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let cancel = CancellationToken::new();

    let (sender, receiver) = tokio::join!(
        async {
            let exit = tokio::select! {
                _ = cancel.cancelled() => SenderExit::Cancelled,
                exit = send_lines(&mut writer, name, &mut input) => exit,
            };
            cancel.cancel();
            exit
        },
        async {
            let exit = tokio::select! {
                _ = cancel.cancelled() => ReceiverExit::Cancelled,
                exit = receive_messages(&mut reader, output) => exit,
            };
            cancel.cancel();
            exit
        },
    );

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown failed: {}", e);
    }

    let outcome = DuplexOutcome { sender, receiver };
    tracing::debug!("Duplex finished: {:?}", outcome);
    outcome
}

async fn send_lines<W>(
    writer: &mut W,
    name: Option<String>,
    input: &mut mpsc::Receiver<String>,
) -> SenderExit
where
    W: AsyncWrite + Unpin,
{
    let name = match name {
        Some(name) => name,
        None => match input.recv().await {
            Some(line) => line,
            None => return SenderExit::InputClosed,
        },
    };
    tracing::debug!("Chatting as {:?}", name);

    while let Some(line) = input.recv().await {
        let message = format_message(&name, &line);
        let sent = async {
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = sent.await {
            tracing::debug!("Send failed: {}", e);
            return SenderExit::WriteFailed;
        }
        if line == QUIT_COMMAND {
            return SenderExit::Quit;
        }
    }
    SenderExit::InputClosed
}

async fn receive_messages<R, O>(reader: &mut R, output: &mut O) -> ReceiverExit
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return ReceiverExit::ServerClosed,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Receive failed: {}", e);
                return ReceiverExit::ReadFailed;
            }
        };

        let message = &buf[..n];
        let shown = async {
            output.write_all(message).await?;
            if !message.ends_with(b"\n") {
                output.write_all(b"\n").await?;
            }
            output.flush().await
        };
        if let Err(e) = shown.await {
            tracing::debug!("Output failed: {}", e);
            return ReceiverExit::OutputFailed;
        }
    }
}
