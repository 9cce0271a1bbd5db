//! Integration tests for session execution.
//!
//! A plain `sh` reading stdin stands in for an interpreter. The real Node.js
//! and Python sessions run when their interpreter is found on PATH.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockrun_core::{
    BufferSink, ExecutionContext, KillHandle, Language, LogNotifier, NodeRepl, OutputSink,
    PythonRepl, ReplDialect, RunCommand, SessionExecutor, SessionLaunch, StreamSource,
};
use tokio::sync::broadcast;

// =============================================================================
// Test Helpers
// =============================================================================

/// Session dialect for a POSIX shell reading commands from stdin.
struct ShRepl;

impl ReplDialect for ShRepl {
    fn launch_args(&self, configured: Vec<String>) -> Vec<String> {
        configured
    }

    fn setup_input(&self) -> Option<String> {
        Some("BLOCKRUN_SETUP=done\n".to_string())
    }

    fn wrap_code(&self, code: &str, sigil: &str) -> String {
        format!("{}\nprintf '%s' '{}'\n", code, sigil)
    }

    fn remove_prompts(&self, output: &str, _source: StreamSource) -> String {
        output.replace("$ ", "")
    }
}

/// Like [`ShRepl`], but also prints the sigil to stderr to fence it.
struct FencedShRepl;

impl ReplDialect for FencedShRepl {
    fn launch_args(&self, configured: Vec<String>) -> Vec<String> {
        configured
    }

    fn wrap_code(&self, code: &str, sigil: &str) -> String {
        format!("{}\nprintf '%s' '{}' >&2\nprintf '%s' '{}'\n", code, sigil, sigil)
    }

    fn fences_stderr(&self) -> bool {
        true
    }
}

fn session_with(path: &str, language: Language, dialect: Box<dyn ReplDialect>) -> ExecutionContext {
    let launch = SessionLaunch {
        path: path.to_string(),
        args: String::new(),
        wsl: false,
        allow_input: true,
    };
    ExecutionContext::Session(SessionExecutor::spawn(
        "notes.md",
        language,
        &launch,
        dialect,
        Arc::new(LogNotifier),
    ))
}

fn sh_session() -> ExecutionContext {
    session_with("sh", Language::Shell, Box::new(ShRepl))
}

/// Full path of `name`, or `None` when it is not installed.
fn interpreter(name: &str) -> Option<String> {
    match which::which(name) {
        Ok(path) => Some(path.display().to_string()),
        Err(_) => {
            eprintln!("Skipping: {} not found on PATH", name);
            None
        }
    }
}

async fn run(ctx: &ExecutionContext, code: &str) -> Arc<BufferSink> {
    let sink = Arc::new(BufferSink::without_input());
    tokio::time::timeout(
        Duration::from_secs(10),
        ctx.run(code, sink.clone(), &RunCommand::default()),
    )
    .await
    .expect("block should complete")
    .unwrap();
    sink
}

/// Sink that logs tagged events into a log shared with other sinks.
struct TaggedSink {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl TaggedSink {
    fn record(&self, event: String) {
        self.log.lock().unwrap().push(format!("{}:{}", self.tag, event));
    }
}

impl OutputSink for TaggedSink {
    fn clear(&self) {}
    fn write(&self, text: &str) {
        self.record(format!("out:{}", text));
    }
    fn write_err(&self, text: &str) {
        self.record(format!("err:{}", text));
    }
    fn close_input(&self) {}
    fn set_kill_handle(&self, _handle: KillHandle) {}
    fn subscribe_input(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
    fn queue_block(&self) {
        self.record("queued".to_string());
    }
    fn start_block(&self) {
        self.record("started".to_string());
    }
}

// =============================================================================
// Sigil protocol
// =============================================================================

#[tokio::test]
async fn test_sigil_is_stripped_from_output() {
    let ctx = sh_session();
    let sink = run(&ctx, "printf 'no trailing newline'").await;
    assert_eq!(sink.stdout(), "no trailing newline");
}

#[tokio::test]
async fn test_state_persists_between_blocks() {
    let ctx = sh_session();
    run(&ctx, "x=41").await;
    let sink = run(&ctx, "echo $((x + 1)) $BLOCKRUN_SETUP").await;
    assert_eq!(sink.stdout(), "42 done\n");
}

#[tokio::test]
async fn test_stderr_goes_through_prompt_filter() {
    let ctx = sh_session();
    let sink = run(&ctx, "echo '$ oops' >&2").await;
    assert_eq!(sink.stderr(), "oops\n");
    assert_eq!(sink.stdout(), "");
}

#[tokio::test]
async fn test_blocks_are_serialized() {
    let ctx = sh_session();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first: Arc<dyn OutputSink> = Arc::new(TaggedSink {
        tag: "a",
        log: log.clone(),
    });
    let second: Arc<dyn OutputSink> = Arc::new(TaggedSink {
        tag: "b",
        log: log.clone(),
    });

    let command = RunCommand::default();
    let (a, b) = tokio::join!(
        ctx.run("sleep 0.3; echo first", first, &command),
        ctx.run("echo second", second, &command),
    );
    a.unwrap();
    b.unwrap();

    let log = log.lock().unwrap().clone();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(position("a:started") < position("a:out:first\n"));
    assert!(position("a:out:first\n") < position("b:started"));
    assert!(position("b:started") < position("b:out:second\n"));
    assert!(position("b:queued") < position("a:out:first\n"));
}

// =============================================================================
// Stderr attribution
// =============================================================================

#[tokio::test]
async fn test_fenced_stderr_stays_with_its_block() {
    let ctx = session_with("sh", Language::Shell, Box::new(FencedShRepl));

    for i in 0..20 {
        let sink = run(&ctx, &format!("echo out {i}; echo \"bad {i}\" >&2")).await;
        assert_eq!(sink.stdout(), format!("out {i}\n"));
        assert_eq!(sink.stderr(), format!("bad {i}\n"), "block {i}");
    }
}

#[tokio::test]
async fn test_late_stderr_reaches_previous_block() {
    let ctx = sh_session();

    let first = run(&ctx, "(sleep 0.3; echo late >&2) &").await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let second = run(&ctx, "echo next").await;

    assert_eq!(first.stderr(), "late\n");
    assert_eq!(second.stdout(), "next\n");
    assert_eq!(second.stderr(), "");
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_crash_mid_block_resolves_and_closes() {
    let ctx = sh_session();
    let sink = run(&ctx, "echo last words; exit 3").await;
    assert_eq!(sink.stdout(), "last words\n");

    tokio::time::timeout(Duration::from_secs(5), ctx.closed().wait())
        .await
        .expect("session should close after its process exits");
    assert!(ctx.is_closed());

    // A dead session resolves immediately without output.
    let sink = run(&ctx, "echo unreachable").await;
    assert_eq!(sink.stdout(), "");
}

#[tokio::test]
async fn test_stop_kills_running_block() {
    let ctx = sh_session();
    let running = {
        let ctx = ctx.clone();
        tokio::spawn(async move { run(&ctx, "sleep 30").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), ctx.stop())
        .await
        .expect("stop should finish once the process is gone")
        .unwrap();
    assert!(ctx.is_closed());
    running.await.unwrap();

    // A second stop has nothing left to kill.
    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_yields_closed_context() {
    let ctx = session_with(
        "/nonexistent/blockrun-interpreter",
        Language::Python,
        Box::new(ShRepl),
    );

    assert!(ctx.is_closed());
    let sink = run(&ctx, "echo nothing").await;
    assert_eq!(sink.stdout(), "");
    ctx.stop().await.unwrap();
}

// =============================================================================
// Real interpreters
// =============================================================================

#[tokio::test]
async fn test_python_session() {
    let Some(python) = interpreter("python3") else {
        return;
    };
    let ctx = session_with(&python, Language::Python, Box::new(PythonRepl::new(true)));

    run(&ctx, "x = 20").await;
    let sink = run(&ctx, "x * 2 + 2").await;
    assert_eq!(sink.stdout(), "42\n");

    let sink = run(&ctx, "raise ValueError('bad value')").await;
    assert!(sink.stderr().contains("bad value"));

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_python_errors_stay_with_their_block() {
    let Some(python) = interpreter("python3") else {
        return;
    };
    let ctx = session_with(&python, Language::Python, Box::new(PythonRepl::new(false)));

    for i in 0..20 {
        let sink = run(&ctx, &format!("raise ValueError('bad {i}')")).await;
        assert!(sink.stderr().contains(&format!("bad {i}")), "block {i}: {:?}", sink.stderr());

        let sink = run(&ctx, &format!("y = {i}")).await;
        assert!(!sink.stderr().contains("bad"), "block after {i}: {:?}", sink.stderr());
    }

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_node_session() {
    let Some(node) = interpreter("node") else {
        return;
    };
    let ctx = session_with(&node, Language::Js, Box::new(NodeRepl));

    run(&ctx, "var total = 40").await;
    let sink = run(&ctx, "console.log(total + 2)").await;
    assert_eq!(sink.stdout(), "42\n");

    // The REPL's console writes errors to its output stream.
    let sink = run(&ctx, "throw new Error('bad value')").await;
    let combined = format!("{}{}", sink.stdout(), sink.stderr());
    assert!(combined.contains("bad value"), "output: {}", combined);

    ctx.stop().await.unwrap();
}
