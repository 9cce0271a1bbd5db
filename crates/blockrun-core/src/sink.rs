//! Consumer-side collaborators: output sinks and user notices.
//!
//! The core never renders anything itself. Everything a block produces is
//! pushed into an [`OutputSink`], and short user-facing messages go through a
//! [`Notifier`].

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::kill::KillHandle;

/// Capacity of the interactive input channel of [`BufferSink`].
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Destination for one block's output.
///
/// Implementations must tolerate calls from any task; the core writes from
/// background reader tasks.
pub trait OutputSink: Send + Sync {
    /// Discard previously displayed content for the current block.
    fn clear(&self);

    /// Append stdout-class text.
    fn write(&self, text: &str);

    /// Append stderr-class text.
    fn write_err(&self, text: &str);

    /// No more interactive input will be accepted for this block.
    fn close_input(&self);

    /// Install the handle a user cancel should use to kill the block's process.
    fn set_kill_handle(&self, handle: KillHandle);

    /// Subscribe to user-typed input destined for the child's stdin.
    ///
    /// `None` means the sink does not accept input.
    fn subscribe_input(&self) -> Option<broadcast::Receiver<String>>;

    /// The block is waiting behind another block of the same context.
    fn queue_block(&self) {}

    /// The block started executing.
    fn start_block(&self) {}
}

/// Receiver of short, transient user-facing messages.
pub trait Notifier: Send + Sync {
    /// Show a notice.
    fn notice(&self, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notice(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Something that happened to a [`BufferSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Clear,
    Stdout(String),
    Stderr(String),
    CloseInput,
    Queued,
    Started,
}

/// In-memory sink that records everything written to it.
///
/// Used by hosts that capture output rather than render it live, and by tests.
pub struct BufferSink {
    events: Mutex<Vec<SinkEvent>>,
    kill_handle: Mutex<Option<KillHandle>>,
    input: Option<broadcast::Sender<String>>,
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSink {
    /// Create a sink that accepts interactive input.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(INPUT_CHANNEL_CAPACITY);
        Self {
            events: Mutex::new(Vec::new()),
            kill_handle: Mutex::new(None),
            input: Some(tx),
        }
    }

    /// Create a sink that never forwards input.
    pub fn without_input() -> Self {
        Self {
            input: None,
            ..Self::new()
        }
    }

    fn record(&self, event: SinkEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// All recorded events, in order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stdout text written since the last clear.
    pub fn stdout(&self) -> String {
        self.collect_since_clear(|event| match event {
            SinkEvent::Stdout(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Stderr text written since the last clear.
    pub fn stderr(&self) -> String {
        self.collect_since_clear(|event| match event {
            SinkEvent::Stderr(text) => Some(text.as_str()),
            _ => None,
        })
    }

    fn collect_since_clear(&self, pick: impl Fn(&SinkEvent) -> Option<&str>) -> String {
        let Ok(events) = self.events.lock() else {
            return String::new();
        };
        let start = events
            .iter()
            .rposition(|event| *event == SinkEvent::Clear)
            .map_or(0, |i| i + 1);
        events[start..].iter().filter_map(pick).collect()
    }

    /// Number of times an event matching `predicate` was recorded.
    pub fn count(&self, predicate: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| predicate(e)).count())
            .unwrap_or(0)
    }

    /// Forward a line of user input to whatever process is listening.
    ///
    /// Returns `false` if nothing is subscribed.
    pub fn send_input(&self, text: impl Into<String>) -> bool {
        self.input
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// The kill handle most recently installed by an executor.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.kill_handle.lock().ok().and_then(|h| h.clone())
    }
}

impl OutputSink for BufferSink {
    fn clear(&self) {
        self.record(SinkEvent::Clear);
    }

    fn write(&self, text: &str) {
        self.record(SinkEvent::Stdout(text.to_string()));
    }

    fn write_err(&self, text: &str) {
        self.record(SinkEvent::Stderr(text.to_string()));
    }

    fn close_input(&self) {
        self.record(SinkEvent::CloseInput);
    }

    fn set_kill_handle(&self, handle: KillHandle) {
        if let Ok(mut slot) = self.kill_handle.lock() {
            *slot = Some(handle);
        }
    }

    fn subscribe_input(&self) -> Option<broadcast::Receiver<String>> {
        self.input.as_ref().map(|tx| tx.subscribe())
    }

    fn queue_block(&self) {
        self.record(SinkEvent::Queued);
    }

    fn start_block(&self) {
        self.record(SinkEvent::Started);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_since_last_clear() {
        let sink = BufferSink::new();
        sink.write("stale");
        sink.clear();
        sink.write("hello ");
        sink.write_err("oops");
        sink.write("world");

        assert_eq!(sink.stdout(), "hello world");
        assert_eq!(sink.stderr(), "oops");
        assert_eq!(sink.count(|e| *e == SinkEvent::Clear), 1);
    }

    #[test]
    fn test_input_requires_subscriber() {
        let sink = BufferSink::new();
        assert!(!sink.send_input("ignored"));

        let mut rx = sink.subscribe_input().unwrap();
        assert!(sink.send_input("42\n"));
        assert_eq!(rx.try_recv().unwrap(), "42\n");
    }

    #[test]
    fn test_without_input() {
        let sink = BufferSink::without_input();
        assert!(sink.subscribe_input().is_none());
        assert!(!sink.send_input("x"));
    }

    #[test]
    fn test_kill_handle_slot() {
        let sink = BufferSink::new();
        assert!(sink.kill_handle().is_none());
        sink.set_kill_handle(KillHandle::new(4242));
        assert_eq!(sink.kill_handle().unwrap().pid(), 4242);
    }
}
