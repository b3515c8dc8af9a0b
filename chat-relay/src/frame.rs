//! Cutting an inbound byte stream into messages.
//!
//! The relay adds no framing of its own on the wire. With [`Framing::Chunk`]
//! whatever a single transport read returns is one message, which is what
//! plain chat clients expect. [`Framing::Line`] instead yields one message per
//! newline-terminated line, so a line split across reads is delivered whole
//! and two lines arriving in one read are delivered separately.
//!
//! Either way a message is at most [`MAX_MESSAGE_SIZE`] bytes and is relayed
//! verbatim, newline included.

use crate::config::Framing;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Transfer unit: the largest message produced by a single read.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Reads messages from one connection.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: BufReader<R>,
    framing: Framing,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap the read half of a connection.
    pub fn new(reader: R, framing: Framing) -> Self {
        Self {
            inner: BufReader::with_capacity(MAX_MESSAGE_SIZE, reader),
            framing,
        }
    }

    /// Framing in use.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed its side. A line longer
    /// than [`MAX_MESSAGE_SIZE`] comes back in pieces of that size, and an
    /// unterminated fragment before EOF is returned as a last message.
    pub async fn next_message(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match self.framing {
            Framing::Chunk => {
                let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
                let n = self.inner.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
            Framing::Line => {
                let mut buf = Vec::new();
                let n = (&mut self.inner)
                    .take(MAX_MESSAGE_SIZE as u64)
                    .read_until(b'\n', &mut buf)
                    .await?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn chunk_returns_each_read() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut reader = MessageReader::new(server, Framing::Chunk);

        client.write_all(b"alice:hello").await.unwrap();
        assert_eq!(
            reader.next_message().await.unwrap().as_deref(),
            Some(&b"alice:hello"[..])
        );

        drop(client);
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunk_caps_message_size() {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        let mut reader = MessageReader::new(server, Framing::Chunk);

        client.write_all(&vec![b'x'; 5000]).await.unwrap();
        drop(client);

        let first = reader.next_message().await.unwrap().unwrap();
        assert!(first.len() <= MAX_MESSAGE_SIZE);

        let mut total = first.len();
        while let Some(next) = reader.next_message().await.unwrap() {
            assert!(next.len() <= MAX_MESSAGE_SIZE);
            total += next.len();
        }
        assert_eq!(total, 5000);
    }

    #[tokio::test]
    async fn line_splits_on_newline() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut reader = MessageReader::new(server, Framing::Line);

        client.write_all(b"alice:hi\nbob:yo\n").await.unwrap();
        drop(client);

        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"alice:hi\n");
        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"bob:yo\n");
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_joins_partial_writes() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut reader = MessageReader::new(server, Framing::Line);

        let writer = tokio::spawn(async move {
            client.write_all(b"alice:hel").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"lo\n").await.unwrap();
        });

        assert_eq!(
            reader.next_message().await.unwrap().unwrap(),
            b"alice:hello\n"
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn line_delivers_trailing_fragment() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut reader = MessageReader::new(server, Framing::Line);

        client.write_all(b"alice:bye").await.unwrap();
        drop(client);

        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"alice:bye");
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlong_line_is_split() {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        let mut reader = MessageReader::new(server, Framing::Line);

        let mut line = vec![b'a'; MAX_MESSAGE_SIZE + 10];
        line.push(b'\n');
        client.write_all(&line).await.unwrap();
        drop(client);

        let first = reader.next_message().await.unwrap().unwrap();
        assert_eq!(first.len(), MAX_MESSAGE_SIZE);
        let second = reader.next_message().await.unwrap().unwrap();
        assert_eq!(second.len(), 11);
        assert_eq!(second.last(), Some(&b'\n'));
    }
}
