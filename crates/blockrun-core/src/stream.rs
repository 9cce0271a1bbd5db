//! Child stream plumbing shared by both execution strategies.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, broadcast};

/// Read buffer size for child stdout/stderr.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Incremental UTF-8 decoder.
///
/// Child processes flush at arbitrary byte boundaries, so a multi-byte
/// character can be split across two reads. Incomplete trailing sequences are
/// carried over to the next chunk; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode the next chunk of bytes.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.carry.len());
        let mut rest: &[u8] = &self.carry;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // SAFETY: `valid_up_to` marks the end of a valid UTF-8 prefix.
                    out.push_str(unsafe { std::str::from_utf8_unchecked(valid) });
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.carry = rest.to_vec();
        out
    }

    /// Flush whatever is left, lossily.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        out
    }
}

/// Read `reader` to EOF, handing each decoded chunk to `on_chunk`.
pub(crate) async fn read_chunks<R, F>(mut reader: R, mut on_chunk: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    on_chunk(text);
                }
            }
            Err(e) => {
                tracing::debug!("Child stream read failed: {}", e);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        on_chunk(rest);
    }
}

/// Forward user input from a sink to a child's stdin until either side closes.
pub(crate) async fn forward_input<W>(mut input: broadcast::Receiver<String>, stdin: Arc<Mutex<W>>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match input.recv().await {
            Ok(text) => {
                let mut stdin = stdin.lock().await;
                if stdin.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} lines of block input", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
