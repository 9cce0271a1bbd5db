//! The execution context contract.
//!
//! An [`ExecutionContext`] owns one running computation for one
//! `(language, file)` pair. It is a closed sum over the two execution
//! strategies; the registry is the only place that decides which one to build.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::error::Result;
use crate::language::Language;
use crate::one_shot::OneShotExecutor;
use crate::session::SessionExecutor;
use crate::settings::LanguageSettings;
use crate::sink::{Notifier, OutputSink};

/// Notice shown when a block could not be executed.
pub const DEFAULT_ERROR_NOTICE: &str = "Error while executing code";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Latch that fires once when a context's process exits for good.
///
/// Cloning shares the latch; any number of tasks may wait on it.
#[derive(Debug, Clone)]
pub struct ClosedSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ClosedSignal {
    /// Create an unfired latch.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Check whether the latch has fired.
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Program, argument string and extension for one `run` call.
///
/// Session contexts ignore it; one-shot contexts spawn from it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunCommand {
    /// Executable to spawn.
    pub program: String,
    /// Space-separated argument string.
    pub args: String,
    /// Extension of the temp source file.
    pub extension: String,
}

impl RunCommand {
    /// Create a run command.
    pub fn new(
        program: impl Into<String>,
        args: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into(),
            extension: extension.into(),
        }
    }

    /// Build the run command a language is configured with.
    pub fn from_settings(settings: &LanguageSettings) -> Self {
        Self::new(&settings.path, &settings.args, &settings.extension)
    }

    /// Split the argument string on single spaces. Empty means no arguments.
    pub fn arg_list(&self) -> Vec<String> {
        split_args(&self.args)
    }
}

pub(crate) fn split_args(args: &str) -> Vec<String> {
    if args.is_empty() {
        Vec::new()
    } else {
        args.split(' ').map(str::to_string).collect()
    }
}

/// What a failed spawn was trying to do, for the error helper.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Failure<'a> {
    pub command: &'a str,
    pub args: &'a str,
    pub temp_file: Option<&'a Path>,
    pub notice: &'a str,
}

impl<'a> Failure<'a> {
    pub(crate) fn new(command: &'a str, args: &'a str) -> Self {
        Self {
            command,
            args,
            temp_file: None,
            notice: DEFAULT_ERROR_NOTICE,
        }
    }

    pub(crate) fn temp_file(mut self, path: &'a Path) -> Self {
        self.temp_file = Some(path);
        self
    }

    pub(crate) fn notice(mut self, notice: &'a str) -> Self {
        self.notice = notice;
        self
    }

    pub(crate) fn message(&self, error: &dyn Display) -> String {
        let temp_file = self
            .temp_file
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let invocation = [self.command, self.args, temp_file.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        format!("Error while executing {}: {}", invocation, error)
    }
}

/// State every context carries regardless of strategy.
#[derive(Clone)]
pub(crate) struct ContextCore {
    pub id: u64,
    pub file: String,
    pub language: Language,
    pub closed: ClosedSignal,
    pub notifier: Arc<dyn Notifier>,
}

impl ContextCore {
    pub(crate) fn new(file: impl Into<String>, language: Language, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            file: file.into(),
            language,
            closed: ClosedSignal::new(),
            notifier,
        }
    }

    /// Log a failure, echo it into the sink if there is one, and show a notice.
    ///
    /// Never turns the failure into an `Err`; the caller resolves normally.
    pub(crate) fn report_error(
        &self,
        failure: Failure<'_>,
        error: &dyn Display,
        sink: Option<&dyn OutputSink>,
    ) {
        let message = failure.message(error);
        tracing::error!("{}", message);
        if let Some(sink) = sink {
            sink.write_err(&message);
        }
        self.notifier.notice(failure.notice);
    }
}

/// A live execution context.
///
/// Cheap to clone; clones refer to the same underlying context.
#[derive(Clone)]
pub enum ExecutionContext {
    /// Spawns a fresh process per invocation.
    OneShot(Arc<OneShotExecutor>),
    /// Reuses one long-lived interactive process.
    Session(Arc<SessionExecutor>),
}

impl ExecutionContext {
    fn core(&self) -> &ContextCore {
        match self {
            Self::OneShot(executor) => executor.core(),
            Self::Session(executor) => executor.core(),
        }
    }

    /// Unique id of this context instance.
    pub fn id(&self) -> u64 {
        self.core().id
    }

    /// File identity this context is bound to.
    pub fn file(&self) -> &str {
        &self.core().file
    }

    /// Language this context runs.
    pub fn language(&self) -> Language {
        self.core().language
    }

    /// Signal fired when the context is done for good.
    pub fn closed(&self) -> ClosedSignal {
        self.core().closed.clone()
    }

    /// Check whether the context has closed.
    pub fn is_closed(&self) -> bool {
        self.core().closed.is_closed()
    }

    /// Check whether this is a one-shot context.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::OneShot(_))
    }

    /// Execute `code`, streaming its output to `sink`.
    ///
    /// Returns once the block has fully finished. Per-block failures are
    /// reported through the sink and the notifier, not as `Err`.
    pub async fn run(
        &self,
        code: &str,
        sink: Arc<dyn OutputSink>,
        command: &RunCommand,
    ) -> Result<()> {
        match self {
            Self::OneShot(executor) => executor.run(code, sink, command).await,
            Self::Session(executor) => executor.run(code, sink).await,
        }
    }

    /// Cancel any in-flight or future execution.
    pub async fn stop(&self) -> Result<()> {
        match self {
            Self::OneShot(executor) => executor.stop().await,
            Self::Session(executor) => executor.stop().await,
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id())
            .field("kind", &if self.is_one_shot() { "one-shot" } else { "session" })
            .field("language", &self.language())
            .field("file", &self.file())
            .finish()
    }
}
