//! Completion sigils for session executors.
//!
//! A session child's stdout is one unbounded byte stream shared by every block
//! it runs. Each block's wrapped code prints a fresh sigil as its very last
//! output; seeing it on stdout means the block has fully flushed.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Prefix of every sigil.
const SIGIL_PREFIX: &str = "SIGIL_BLOCK_DONE";

/// Generate a sigil for one invocation.
///
/// Random value, timestamp and code length together keep sigils from
/// recurring within a session or colliding with the block's own text.
pub fn new_sigil(code: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "{}_{}_{}_{}",
        SIGIL_PREFIX,
        Uuid::new_v4().simple(),
        millis,
        code.len()
    )
}

/// Result of feeding one chunk to a [`SigilScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Text that is safe to forward to the sink.
    pub output: String,
    /// The sigil has been seen; the block is complete.
    pub done: bool,
}

/// Watches a stdout stream for one sigil.
///
/// A chunk ending in a partial sigil is held back until the next chunk shows
/// whether it was the sigil or ordinary output.
#[derive(Debug)]
pub struct SigilScanner {
    sigil: String,
    pending: String,
}

impl SigilScanner {
    /// Scan for `sigil`.
    pub fn new(sigil: impl Into<String>) -> Self {
        Self {
            sigil: sigil.into(),
            pending: String::new(),
        }
    }

    /// Feed the next stdout chunk.
    pub fn push(&mut self, chunk: &str) -> Scan {
        self.pending.push_str(chunk);

        if let Some(at) = self.pending.find(&self.sigil) {
            let trailing = self.pending.len() - at - self.sigil.len();
            if trailing > 0 {
                tracing::debug!("Discarding {} bytes after completion sigil", trailing);
            }
            let mut output = std::mem::take(&mut self.pending);
            output.truncate(at);
            return Scan { output, done: true };
        }

        let cut = self.pending.len() - self.partial_suffix_len();
        let output: String = self.pending.drain(..cut).collect();
        Scan {
            output,
            done: false,
        }
    }

    /// Release anything still held back, e.g. when the stream ended early.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Length of the longest suffix of `pending` that is a proper prefix of the sigil.
    fn partial_suffix_len(&self) -> usize {
        let max = self.sigil.len().saturating_sub(1).min(self.pending.len());
        (1..=max)
            .rev()
            .find(|&k| {
                self.sigil.is_char_boundary(k)
                    && self.pending.is_char_boundary(self.pending.len() - k)
                    && self.pending.ends_with(&self.sigil[..k])
            })
            .unwrap_or(0)
    }
}
