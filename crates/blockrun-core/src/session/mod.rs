//! Session executor: one long-lived interactive child per context.
//!
//! Every block is wrapped by a [`ReplDialect`] so that the child prints a
//! fresh completion sigil after the block's own output. Blocks are serialized
//! through a [`JobQueue`]; the sigil on stdout is what ends a job.
//!
//! Stdout and stderr are read by separate pumps, so stderr written just before
//! the sigil can still be in flight when the sigil arrives. Dialects that can
//! also print the sigil to stderr fence it; the rest get a short grace window.
//! Whatever still trails in is handed to the previous block's sink when the
//! next block starts.
//!
//! ```text
//! run(code) ──► queue ──► stdin writer ──► child ──► stdout/stderr pumps ──► job ──► sink
//!                                                    (sigil ends the job)
//! ```

mod node;
mod python;
mod r;

pub use node::NodeRepl;
pub use python::PythonRepl;
pub use r::RRepl;

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, mpsc};

use crate::context::{ContextCore, Failure, split_args};
use crate::error::{Error, Result};
use crate::kill::kill_process_tree;
use crate::language::Language;
use crate::queue::JobQueue;
use crate::settings::LanguageSettings;
use crate::sigil::{SigilScanner, new_sigil};
use crate::sink::{Notifier, OutputSink};
use crate::stream::{StreamSource, read_chunks};

/// Notice shown when a session's interpreter exits.
const RUNTIME_EXITED_NOTICE: &str = "Runtime exited";

/// Placeholder in an executable path replaced by the current user name.
const USERNAME_PLACEHOLDER: &str = "%USERNAME%";

/// How long to wait for the stderr sigil once stdout completed.
const STDERR_FENCE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long unfenced dialects keep collecting stderr after the sigil.
const STDERR_GRACE: Duration = Duration::from_millis(25);

/// Language-specific half of a session.
pub trait ReplDialect: Send + Sync {
    /// Full argument list to launch the interpreter with.
    fn launch_args(&self, configured: Vec<String>) -> Vec<String>;

    /// Text written to stdin once, right after spawn.
    fn setup_input(&self) -> Option<String> {
        None
    }

    /// Text that runs `code`, reports its errors on stderr and always prints
    /// `sigil` to stdout as its very last output.
    fn wrap_code(&self, code: &str, sigil: &str) -> String;

    /// Whether the wrapped code also prints `sigil` to stderr, after all of
    /// the block's own stderr output and before the stdout sigil.
    fn fences_stderr(&self) -> bool {
        false
    }

    /// Strip interactive prompt artifacts from a chunk of output.
    fn remove_prompts(&self, output: &str, source: StreamSource) -> String {
        let _ = source;
        output.to_string()
    }
}

/// Session dialect for a language, if it has one.
pub fn dialect_for(language: Language, settings: &LanguageSettings) -> Option<Box<dyn ReplDialect>> {
    match language {
        Language::Js => Some(Box::new(NodeRepl)),
        Language::Python => Some(Box::new(PythonRepl::new(settings.embed_plots))),
        Language::R => Some(Box::new(RRepl::new())),
        _ => None,
    }
}

/// How to launch a session's interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLaunch {
    /// Executable path; may contain `%USERNAME%`.
    pub path: String,
    /// Space-separated configured arguments.
    pub args: String,
    /// Route the spawn through `wsl -e`.
    pub wsl: bool,
    /// Forward sink input to the interpreter's stdin.
    pub allow_input: bool,
}

impl SessionLaunch {
    /// Launch settings for a configured language.
    pub fn from_settings(settings: &LanguageSettings, wsl: bool, allow_input: bool) -> Self {
        Self {
            path: settings.path.clone(),
            args: settings.args.clone(),
            wsl,
            allow_input,
        }
    }

    /// Program and argument list for `dialect`, with `%USERNAME%` replaced by
    /// `user` and rewritten for WSL when enabled.
    pub fn command_line(
        &self,
        dialect: &dyn ReplDialect,
        user: Option<&str>,
    ) -> (String, Vec<String>) {
        let program = substitute_username(&self.path, user);
        let mut args = dialect.launch_args(split_args(&self.args));
        if !self.wsl {
            return (program, args);
        }
        let mut wsl_args = vec!["-e".to_string(), program];
        wsl_args.append(&mut args);
        ("wsl".to_string(), wsl_args)
    }
}

#[derive(Debug)]
struct StreamChunk {
    source: StreamSource,
    text: String,
}

/// The block that last owned the session output.
struct PreviousBlock {
    sink: Arc<dyn OutputSink>,
    sigil: String,
}

struct OutputState {
    rx: mpsc::UnboundedReceiver<StreamChunk>,
    previous: Option<PreviousBlock>,
}

/// Routes one block's output chunks to its sink.
struct BlockOutput<'a> {
    dialect: &'a dyn ReplDialect,
    sink: &'a Arc<dyn OutputSink>,
    stdout: SigilScanner,
    /// Set while a stderr sigil is expected but not yet seen.
    stderr: Option<SigilScanner>,
}

impl<'a> BlockOutput<'a> {
    fn new(dialect: &'a dyn ReplDialect, sink: &'a Arc<dyn OutputSink>, sigil: &str) -> Self {
        Self {
            dialect,
            sink,
            stdout: SigilScanner::new(sigil),
            stderr: dialect.fences_stderr().then(|| SigilScanner::new(sigil)),
        }
    }

    /// Forward stdout; true once the stdout sigil has been seen.
    fn stdout(&mut self, text: &str) -> bool {
        let scan = self.stdout.push(text);
        if !scan.output.is_empty() {
            self.sink.write(&scan.output);
        }
        scan.done
    }

    fn stderr(&mut self, text: &str) {
        let text = match self.stderr.as_mut() {
            Some(scanner) => {
                let scan = scanner.push(text);
                if scan.done {
                    self.stderr = None;
                }
                scan.output
            }
            None => text.to_string(),
        };
        write_stderr(self.dialect, self.sink.as_ref(), &text);
    }

    /// Release held-back text after the stream ended early.
    fn flush(&mut self) {
        let rest = self.stdout.flush();
        if !rest.is_empty() {
            self.sink.write(&rest);
        }
        if let Some(mut scanner) = self.stderr.take() {
            let rest = scanner.flush();
            write_stderr(self.dialect, self.sink.as_ref(), &rest);
        }
    }
}

/// Context backed by one persistent interpreter process.
pub struct SessionExecutor {
    core: ContextCore,
    dialect: Box<dyn ReplDialect>,
    queue: JobQueue,
    /// Child pid; `None` once the process exited or was stopped.
    pid: Arc<Mutex<Option<u32>>>,
    stdin: mpsc::UnboundedSender<String>,
    allow_input: bool,
    output: tokio::sync::Mutex<OutputState>,
}

impl SessionExecutor {
    /// Spawn the interpreter for `(language, file)`.
    ///
    /// A spawn failure is reported through the notifier and yields a context
    /// that is already closed. Must be called from within a tokio runtime.
    pub fn spawn(
        file: impl Into<String>,
        language: Language,
        launch: &SessionLaunch,
        dialect: Box<dyn ReplDialect>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let core = ContextCore::new(file, language, notifier);
        let queue = JobQueue::new(core.closed.clone());
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let pid = Arc::new(Mutex::new(None));

        let user = std::env::var("USERNAME").ok();
        let (program, args) = launch.command_line(dialect.as_ref(), user.as_deref());

        tracing::debug!("Starting session: {} {}", program, args.join(" "));
        let spawned = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn {
                command: program.clone(),
                message: e.to_string(),
            });

        match spawned {
            Ok(mut child) => {
                if let Ok(mut slot) = pid.lock() {
                    *slot = child.id();
                }
                if let Some(stdin) = child.stdin.take() {
                    tokio::spawn(write_stdin(stdin, stdin_rx));
                }
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();

                let monitor_core = core.clone();
                let program_name = program.clone();
                let command_line = args.join(" ");
                let slot = Arc::clone(&pid);
                tokio::spawn(async move {
                    let out_tx = output_tx.clone();
                    let pump_stdout = async move {
                        if let Some(stdout) = stdout {
                            read_chunks(stdout, |text| {
                                let _ = out_tx.send(StreamChunk {
                                    source: StreamSource::Stdout,
                                    text,
                                });
                            })
                            .await;
                        }
                    };
                    let pump_stderr = async move {
                        if let Some(stderr) = stderr {
                            read_chunks(stderr, |text| {
                                let _ = output_tx.send(StreamChunk {
                                    source: StreamSource::Stderr,
                                    text,
                                });
                            })
                            .await;
                        }
                    };
                    let (_, _, waited) = tokio::join!(pump_stdout, pump_stderr, child.wait());

                    let pid = slot.lock().ok().and_then(|mut slot| slot.take());
                    match waited {
                        Ok(status) => tracing::warn!("Session runtime exited with {}", status),
                        Err(e) => {
                            monitor_core.report_error(
                                Failure::new(&program_name, &command_line),
                                &e,
                                None,
                            );
                            // Take down whatever is left of the interpreter.
                            if let Some(pid) = pid {
                                if let Err(e) = kill_process_tree(pid).await {
                                    tracing::warn!("Failed to kill session runtime: {}", e);
                                }
                            }
                        }
                    }
                    monitor_core.notifier.notice(RUNTIME_EXITED_NOTICE);
                    monitor_core.closed.fire();
                });
            }
            Err(e) => {
                let args_line = args.join(" ");
                let notice = format!("Error launching process: {}", e);
                core.report_error(Failure::new(&program, &args_line).notice(&notice), &e, None);
                core.closed.fire();
            }
        }

        if let Some(setup) = dialect.setup_input() {
            let _ = stdin_tx.send(setup);
        }

        Arc::new(Self {
            core,
            dialect,
            queue,
            pid,
            stdin: stdin_tx,
            allow_input: launch.allow_input,
            output: tokio::sync::Mutex::new(OutputState {
                rx: output_rx,
                previous: None,
            }),
        })
    }

    pub(crate) fn core(&self) -> &ContextCore {
        &self.core
    }

    /// Pid of the interpreter, while it is alive.
    pub fn pid(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|slot| *slot)
    }

    /// Queue one block and wait until its sigil arrives or the session dies.
    pub async fn run(self: &Arc<Self>, code: &str, sink: Arc<dyn OutputSink>) -> Result<()> {
        sink.queue_block();
        let this = Arc::clone(self);
        let code = code.to_string();
        self.queue
            .enqueue(async move { this.execute(&code, sink).await })
            .await
    }

    /// Kill the interpreter and its descendants, then wait for it to close.
    ///
    /// Kill failures are returned to the caller.
    pub async fn stop(&self) -> Result<()> {
        let pid = self.pid.lock().ok().and_then(|mut slot| slot.take());
        let Some(pid) = pid else {
            return Ok(());
        };
        kill_process_tree(pid).await?;
        self.core.closed.wait().await;
        Ok(())
    }

    async fn execute(&self, code: &str, sink: Arc<dyn OutputSink>) -> Result<()> {
        if self.pid().is_none() {
            return Ok(());
        }

        let sigil = new_sigil(code);
        sink.start_block();

        let mut output = self.output.lock().await;
        let state = &mut *output;
        while let Ok(late) = state.rx.try_recv() {
            self.forward_late(state.previous.as_ref(), late);
        }

        if self.stdin.send(self.dialect.wrap_code(code, &sigil)).is_err() {
            return Ok(());
        }
        sink.clear();

        let input = if self.allow_input {
            sink.subscribe_input()
        } else {
            None
        };
        let forwarder =
            input.map(|input| tokio::spawn(forward_to_stdin(input, self.stdin.clone())));

        let mut block = BlockOutput::new(self.dialect.as_ref(), &sink, &sigil);
        loop {
            match state.rx.recv().await {
                Some(StreamChunk {
                    source: StreamSource::Stdout,
                    text,
                }) => {
                    if block.stdout(&text) {
                        self.collect_trailing_stderr(&mut state.rx, &mut block).await;
                        tracing::debug!("Block completed in session for {}", self.core.file);
                        break;
                    }
                }
                Some(StreamChunk {
                    source: StreamSource::Stderr,
                    text,
                }) => block.stderr(&text),
                None => {
                    block.flush();
                    tracing::debug!("Session output ended before the block completed");
                    break;
                }
            }
        }

        state.previous = Some(PreviousBlock {
            sink: Arc::clone(&sink),
            sigil,
        });
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        Ok(())
    }

    /// After the stdout sigil, keep taking stderr until the stderr sigil shows
    /// up, or for a short grace window when the dialect has no stderr sigil.
    async fn collect_trailing_stderr(
        &self,
        rx: &mut mpsc::UnboundedReceiver<StreamChunk>,
        block: &mut BlockOutput<'_>,
    ) {
        let fenced = self.dialect.fences_stderr();
        if fenced && block.stderr.is_none() {
            return;
        }
        let window = if fenced {
            STDERR_FENCE_TIMEOUT
        } else {
            STDERR_GRACE
        };
        let deadline = tokio::time::Instant::now() + window;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(StreamChunk {
                    source: StreamSource::Stderr,
                    text,
                })) => {
                    block.stderr(&text);
                    if fenced && block.stderr.is_none() {
                        return;
                    }
                }
                Ok(Some(StreamChunk {
                    source: StreamSource::Stdout,
                    text,
                })) => {
                    let text = self.dialect.remove_prompts(&text, StreamSource::Stdout);
                    if !text.is_empty() {
                        block.sink.write(&text);
                    }
                }
                Ok(None) => return,
                Err(_) => {
                    if fenced {
                        tracing::debug!("No stderr sigil within {:?}", window);
                    }
                    return;
                }
            }
        }
    }

    /// Hand output that arrived between blocks to the block that produced it.
    fn forward_late(&self, previous: Option<&PreviousBlock>, chunk: StreamChunk) {
        let Some(previous) = previous else {
            tracing::debug!("Discarding {} bytes of session output", chunk.text.len());
            return;
        };
        let text = chunk.text.replace(&previous.sigil, "");
        match chunk.source {
            StreamSource::Stdout => {
                let text = self.dialect.remove_prompts(&text, StreamSource::Stdout);
                if !text.is_empty() {
                    previous.sink.write(&text);
                }
            }
            StreamSource::Stderr => {
                write_stderr(self.dialect.as_ref(), previous.sink.as_ref(), &text)
            }
        }
    }
}

fn write_stderr(dialect: &dyn ReplDialect, sink: &dyn OutputSink, text: &str) {
    let text = dialect.remove_prompts(text, StreamSource::Stderr);
    if !text.is_empty() {
        sink.write_err(&text);
    }
}

/// Replace `%USERNAME%` with `user`, usually the `USERNAME` environment variable.
pub fn substitute_username(path: &str, user: Option<&str>) -> String {
    match user {
        Some(user) if path.contains(USERNAME_PLACEHOLDER) => {
            path.replacen(USERNAME_PLACEHOLDER, user, 1)
        }
        _ => path.to_string(),
    }
}

/// Own the child's stdin and write everything sent to it, in order.
async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = stdin.write_all(text.as_bytes()).await {
            tracing::debug!("Session stdin closed: {}", e);
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn forward_to_stdin(
    mut input: broadcast::Receiver<String>,
    stdin: mpsc::UnboundedSender<String>,
) {
    loop {
        match input.recv().await {
            Ok(text) => {
                if stdin.send(text).is_err() {
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

/// Encode `text` as a double-quoted string literal.
///
/// JSON string syntax is also valid string literal syntax in JavaScript,
/// Python and R.
pub(crate) fn string_literal(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}
