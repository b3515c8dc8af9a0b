//! Terminal input.
//!
//! Blocking line reads happen on a dedicated OS thread that feeds a channel,
//! so the async side never blocks on the terminal and exiting the process is
//! not held up by a pending read.

use std::io::BufRead;
use tokio::sync::mpsc;

/// Lines buffered between the reader thread and the sender.
const INPUT_BUFFER: usize = 64;

/// Read lines from `source` on a background thread.
///
/// Line endings (`\n` or `\r\n`) are stripped. The channel closes at end of
/// input, on a read error, or once the receiver is dropped.
pub fn spawn_line_reader<B>(source: B) -> mpsc::Receiver<String>
where
    B: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    std::thread::spawn(move || {
        for line in source.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!("Input read failed: {}", e);
                    break;
                }
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Read lines from standard input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}
