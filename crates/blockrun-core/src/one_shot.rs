//! One-shot executor: a fresh child process per invocation.
//!
//! Each `run` writes the block to `temp_<token>.<ext>`, spawns the configured
//! program on it and streams the child's output to the sink. A C-style
//! compiler gets two stages: compile to `temp_<token>.out`, then run the
//! binary only if compilation succeeded.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::context::{ContextCore, Failure, RunCommand, split_args};
use crate::error::{Error, Result};
use crate::kill::KillHandle;
use crate::language::Language;
use crate::paths::{InvocationToken, binary_path_for, windows_path_to_wsl};
use crate::settings::FileEncoding;
use crate::sink::{Notifier, OutputSink};
use crate::stream::{forward_input, read_chunks};

/// Notice shown when a child exits unsuccessfully.
const EXIT_FAILURE_NOTICE: &str = "Error!";

/// Which one-shot behaviour a context uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OneShotFlavor {
    /// Write a temp file and run the program on it.
    #[default]
    Plain,
    /// C and C++ through an interpreter such as cling.
    ///
    /// With `use_main`, the block's `main()` is renamed after the temp file
    /// (unless the extension is `c`) and renamed back in the output. Without
    /// it, each source line is passed as its own argument and no temp file is
    /// written.
    CFamily { use_main: bool },
}

/// Static configuration of a one-shot context.
#[derive(Debug, Clone, Copy)]
pub struct OneShotOptions {
    /// Run the program through the platform shell.
    pub uses_shell: bool,
    /// Route the spawn through `wsl -e`.
    pub wsl: bool,
    /// Forward sink input to the child's stdin. When off the child reads EOF.
    pub allow_input: bool,
    /// Encoding of the temp file.
    pub encoding: FileEncoding,
    pub flavor: OneShotFlavor,
}

impl Default for OneShotOptions {
    fn default() -> Self {
        Self {
            uses_shell: false,
            wsl: false,
            allow_input: true,
            encoding: FileEncoding::default(),
            flavor: OneShotFlavor::default(),
        }
    }
}

/// A caller waiting for its invocation to finish.
struct Pending {
    token: InvocationToken,
    done: oneshot::Sender<()>,
}

/// Where the current invocation is.
enum Completion {
    Idle,
    AwaitingCompile(Pending),
    AwaitingRun(Pending),
}

impl Completion {
    fn token(&self) -> Option<&InvocationToken> {
        match self {
            Completion::Idle => None,
            Completion::AwaitingCompile(p) | Completion::AwaitingRun(p) => Some(&p.token),
        }
    }

    fn take(&mut self) -> Option<Pending> {
        match std::mem::replace(self, Completion::Idle) {
            Completion::Idle => None,
            Completion::AwaitingCompile(p) | Completion::AwaitingRun(p) => Some(p),
        }
    }
}

/// Rewrites the renamed entry point back to `main()` in child output.
#[derive(Debug, Clone)]
struct EntryRename {
    placeholder: String,
}

impl EntryRename {
    fn new(token: &InvocationToken) -> Self {
        Self {
            placeholder: format!("{}()", token.stem()),
        }
    }

    fn rename_main<'a>(&self, code: &'a str) -> Cow<'a, str> {
        if code.contains("main()") {
            Cow::Owned(code.replace("main()", &self.placeholder))
        } else {
            Cow::Borrowed(code)
        }
    }

    fn restore_main(&self, text: String) -> String {
        if text.contains(&self.placeholder) {
            text.replace(&self.placeholder, "main()")
        } else {
            text
        }
    }
}

/// Context that spawns a new process for every block.
pub struct OneShotExecutor {
    core: ContextCore,
    options: OneShotOptions,
    completion: Mutex<Completion>,
}

impl OneShotExecutor {
    /// Create a one-shot context for `(language, file)`.
    pub fn new(
        file: impl Into<String>,
        language: Language,
        options: OneShotOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            core: ContextCore::new(file, language, notifier),
            options,
            completion: Mutex::new(Completion::Idle),
        }
    }

    pub(crate) fn core(&self) -> &ContextCore {
        &self.core
    }

    /// The options this context was built with.
    pub fn options(&self) -> OneShotOptions {
        self.options
    }

    /// Run one block and wait until its last stage has closed.
    ///
    /// A previous invocation still waiting for its process is resolved
    /// immediately; its process keeps running and cleans up after itself.
    pub async fn run(
        self: &Arc<Self>,
        code: &str,
        sink: Arc<dyn OutputSink>,
        command: &RunCommand,
    ) -> Result<()> {
        let token = InvocationToken::new();
        let (done, finished) = oneshot::channel();
        self.install(Pending {
            token: token.clone(),
            done,
        });

        match self.options.flavor {
            OneShotFlavor::CFamily { use_main: false } => {
                self.launch_inline(code, sink, command, token)
            }
            OneShotFlavor::CFamily { use_main: true } if command.extension != "c" => {
                let rename = EntryRename::new(&token);
                let code = rename.rename_main(code);
                self.launch(&code, sink, command, token, Some(rename)).await
            }
            _ => self.launch(code, sink, command, token, None).await,
        }

        // A dropped sender means the invocation was torn down; either way it is over.
        let _ = finished.await;
        Ok(())
    }

    /// One-shot contexts keep nothing alive between blocks.
    ///
    /// A running child is torn down through the kill handle on its sink.
    pub async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn install(&self, pending: Pending) {
        let Ok(mut completion) = self.completion.lock() else {
            return;
        };
        if let Some(previous) = completion.take() {
            tracing::debug!("Superseding invocation {}", previous.token.as_str());
            let _ = previous.done.send(());
        }
        *completion = Completion::AwaitingRun(pending);
    }

    /// Resolve the caller of `token`, if it is still the one waiting.
    fn resolve(&self, token: &InvocationToken) {
        let Ok(mut completion) = self.completion.lock() else {
            return;
        };
        if completion.token() != Some(token) {
            return;
        }
        if let Some(pending) = completion.take() {
            let _ = pending.done.send(());
        }
    }

    fn set_stage(&self, token: &InvocationToken, compiling: bool) {
        let Ok(mut completion) = self.completion.lock() else {
            return;
        };
        if completion.token() != Some(token) {
            return;
        }
        if let Some(pending) = completion.take() {
            *completion = if compiling {
                Completion::AwaitingCompile(pending)
            } else {
                Completion::AwaitingRun(pending)
            };
        }
    }

    async fn launch(
        self: &Arc<Self>,
        code: &str,
        sink: Arc<dyn OutputSink>,
        command: &RunCommand,
        token: InvocationToken,
        rename: Option<EntryRename>,
    ) {
        let source = token.temp_file(&command.extension);
        let failure = Failure::new(&command.program, &command.args).temp_file(&source);

        if let Err(e) = tokio::fs::write(&source, self.options.encoding.encode(code)).await {
            self.core.report_error(failure, &e, Some(sink.as_ref()));
            self.resolve(&token);
            return;
        }

        let (program, mut args) = self.command_line(command, &source);

        if is_c_compiler(&program) {
            let binary = binary_path_for(&source);
            args.push("-o".to_string());
            args.push(binary.to_string_lossy().into_owned());
            self.set_stage(&token, true);

            match spawn_child(&program, &args, self.options.uses_shell) {
                Ok(compiler) => {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.compile_then_run(compiler, sink, source, binary, token, rename)
                            .await;
                    });
                }
                Err(e) => self.spawn_failed(failure, &e, &sink, &source, &token).await,
            }
            return;
        }

        match spawn_child(&program, &args, self.options.uses_shell) {
            Ok(child) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.handle_child(child, &sink, Some(&source), rename.as_ref())
                        .await;
                    this.resolve(&token);
                });
            }
            Err(e) => self.spawn_failed(failure, &e, &sink, &source, &token).await,
        }
    }

    /// C-family without a `main` wrapper: every code line is an argument.
    fn launch_inline(
        self: &Arc<Self>,
        code: &str,
        sink: Arc<dyn OutputSink>,
        command: &RunCommand,
        token: InvocationToken,
    ) {
        let mut args = command.arg_list();
        args.extend(code.split('\n').map(str::to_string));

        match spawn_child(&command.program, &args, self.options.uses_shell) {
            Ok(child) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.handle_child(child, &sink, None, None).await;
                    this.resolve(&token);
                });
            }
            Err(e) => {
                let failure = Failure::new(&command.program, &command.args);
                self.core.report_error(failure, &e, Some(sink.as_ref()));
                self.resolve(&token);
            }
        }
    }

    async fn compile_then_run(
        self: Arc<Self>,
        compiler: Child,
        sink: Arc<dyn OutputSink>,
        source: PathBuf,
        binary: PathBuf,
        token: InvocationToken,
        rename: Option<EntryRename>,
    ) {
        let status = self
            .handle_child(compiler, &sink, Some(&source), rename.as_ref())
            .await;
        if !status.is_some_and(|s| s.success()) {
            tracing::debug!("Compilation failed, not running {}", binary.display());
            self.resolve(&token);
            return;
        }

        self.set_stage(&token, false);
        let program = binary.to_string_lossy().into_owned();
        match spawn_child(&program, &[], self.options.uses_shell) {
            Ok(child) => {
                self.handle_child(child, &sink, Some(&binary), rename.as_ref())
                    .await;
            }
            Err(e) => {
                let failure = Failure::new(&program, "");
                self.core.report_error(failure, &e, Some(sink.as_ref()));
                remove_temp_file(&binary).await;
            }
        }
        self.resolve(&token);
    }

    async fn spawn_failed(
        &self,
        failure: Failure<'_>,
        error: &Error,
        sink: &Arc<dyn OutputSink>,
        source: &Path,
        token: &InvocationToken,
    ) {
        self.core.report_error(failure, error, Some(sink.as_ref()));
        remove_temp_file(source).await;
        self.resolve(token);
    }

    /// Program and argument list, rewritten for WSL when enabled.
    fn command_line(&self, command: &RunCommand, source: &Path) -> (String, Vec<String>) {
        let mut args = split_args(&command.args);
        let source = source.to_string_lossy();
        if self.options.wsl {
            let mut wsl_args = vec!["-e".to_string(), command.program.clone()];
            wsl_args.append(&mut args);
            wsl_args.push(windows_path_to_wsl(&source));
            ("wsl".to_string(), wsl_args)
        } else {
            args.push(source.into_owned());
            (command.program.clone(), args)
        }
    }

    /// Stream one child's output into the sink until it closes.
    ///
    /// Returns the exit status, or `None` if waiting on the child failed.
    async fn handle_child(
        &self,
        mut child: Child,
        sink: &Arc<dyn OutputSink>,
        temp_file: Option<&Path>,
        rename: Option<&EntryRename>,
    ) -> Option<ExitStatus> {
        sink.clear();
        if let Some(pid) = child.id() {
            sink.set_kill_handle(KillHandle::new(pid));
        }

        // Without an input subscription stdin is dropped here, giving the child EOF.
        let input = if self.options.allow_input {
            sink.subscribe_input()
        } else {
            None
        };
        let forwarder = match (input, child.stdin.take()) {
            (Some(input), Some(stdin)) => Some(tokio::spawn(forward_input(
                input,
                Arc::new(tokio::sync::Mutex::new(stdin)),
            ))),
            _ => None,
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let restore = |text: String| match rename {
            Some(rename) => rename.restore_main(text),
            None => text,
        };

        let read_stdout = async {
            if let Some(stdout) = stdout {
                read_chunks(stdout, |chunk| sink.write(&restore(chunk))).await;
            }
        };
        let read_stderr = async {
            if let Some(stderr) = stderr {
                read_chunks(stderr, |chunk| sink.write_err(&restore(chunk))).await;
            }
        };
        let (_, _, waited) = tokio::join!(read_stdout, read_stderr, child.wait());

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        let status = match waited {
            Ok(status) => {
                if !status.success() {
                    tracing::warn!("Block process exited with {}", status);
                    self.core.notifier.notice(EXIT_FAILURE_NOTICE);
                }
                Some(status)
            }
            Err(e) => {
                tracing::error!("Waiting on block process failed: {}", e);
                self.core.notifier.notice(EXIT_FAILURE_NOTICE);
                sink.write_err(&e.to_string());
                None
            }
        };

        sink.close_input();
        if let Some(path) = temp_file {
            remove_temp_file(path).await;
        }
        status
    }
}

/// Whether `program` names a C compiler that needs the two-stage route.
fn is_c_compiler(program: &str) -> bool {
    program.ends_with("gcc") || program.ends_with("gcc.exe")
}

fn spawn_child(program: &str, args: &[String], uses_shell: bool) -> Result<Child> {
    tracing::debug!("Spawning {} {}", program, args.join(" "));
    let mut command = if uses_shell {
        shell_command(program, args)
    } else {
        let mut command = Command::new(program);
        command.args(args);
        command
    };
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Spawn {
            command: program.to_string(),
            message: e.to_string(),
        })
}

/// The command line joined with spaces and handed to the platform shell.
fn shell_command(program: &str, args: &[String]) -> Command {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }

    #[cfg(windows)]
    {
        let mut command = Command::new("cmd.exe");
        command.args(["/d", "/s", "/c"]).arg(line);
        command
    }

    #[cfg(not(windows))]
    {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(line);
        command
    }
}

async fn remove_temp_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::error!("Failed to remove temp file {}: {}", path.display(), e);
    }
}
