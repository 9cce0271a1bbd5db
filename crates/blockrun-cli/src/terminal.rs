//! Terminal rendering of block output and notices.

use std::io::{self, Write};
use std::sync::Mutex;

use blockrun_core::{KillHandle, Notifier, OutputSink};
use tokio::sync::broadcast;

use crate::colors;

/// Streams one block's output straight to the terminal.
///
/// Stdout text goes to stdout and stderr text to stderr, uncolored so piped
/// output stays clean. The terminal cannot take back what it printed, so
/// `clear` only records that the block restarted.
#[derive(Default)]
pub struct TerminalSink {
    kill_handle: Mutex<Option<KillHandle>>,
    restarts: Mutex<usize>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The kill handle of the process currently writing to this sink.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.kill_handle.lock().ok().and_then(|h| h.clone())
    }
}

impl OutputSink for TerminalSink {
    fn clear(&self) {
        if let Ok(mut restarts) = self.restarts.lock() {
            *restarts += 1;
            if *restarts > 1 {
                println!("{}--{}", colors::DIM, colors::RESET);
            }
        }
    }

    fn write(&self, text: &str) {
        print!("{}", text);
        colors::flush_stdout();
    }

    fn write_err(&self, text: &str) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }

    fn close_input(&self) {}

    fn set_kill_handle(&self, handle: KillHandle) {
        if let Ok(mut slot) = self.kill_handle.lock() {
            *slot = Some(handle);
        }
    }

    fn subscribe_input(&self) -> Option<broadcast::Receiver<String>> {
        None
    }

    fn queue_block(&self) {
        tracing::debug!("Block queued behind a running block");
    }
}

/// Prints notices to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notice(&self, message: &str) {
        eprintln!("{}[notice]{} {}", colors::YELLOW, colors::RESET, message);
    }
}
