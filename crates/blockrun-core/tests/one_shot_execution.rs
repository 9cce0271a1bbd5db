//! Integration tests for one-shot execution.
//!
//! Blocks are shell scripts run by `sh`, so these only run on Unix.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockrun_core::{
    BufferSink, ExecutionContext, Language, Notifier, OneShotExecutor, OneShotFlavor,
    OneShotOptions, RunCommand,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Notifier that remembers every notice.
#[derive(Default)]
struct Notices(Mutex<Vec<String>>);

impl Notices {
    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for Notices {
    fn notice(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

fn context(options: OneShotOptions, notices: Arc<Notices>) -> ExecutionContext {
    ExecutionContext::OneShot(Arc::new(OneShotExecutor::new(
        "notes.md",
        Language::Shell,
        options,
        notices,
    )))
}

fn sh() -> RunCommand {
    RunCommand::new("sh", "", "sh")
}

// =============================================================================
// Plain runs
// =============================================================================

#[tokio::test]
async fn test_consecutive_runs_use_fresh_temp_files() {
    let ctx = context(OneShotOptions::default(), Arc::default());

    let first = Arc::new(BufferSink::without_input());
    ctx.run("printf '%s' \"$0\"", first.clone(), &sh()).await.unwrap();
    let second = Arc::new(BufferSink::without_input());
    ctx.run("printf '%s' \"$0\"", second.clone(), &sh()).await.unwrap();

    let first_path = PathBuf::from(first.stdout());
    let second_path = PathBuf::from(second.stdout());
    assert_ne!(first_path, second_path);
    for path in [&first_path, &second_path] {
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.extension().unwrap(), "sh");
        assert!(!path.exists(), "temp file {:?} should be removed", path);
    }
}

#[tokio::test]
async fn test_non_zero_exit_keeps_output_and_notices() {
    let notices = Arc::new(Notices::default());
    let ctx = context(OneShotOptions::default(), notices.clone());
    let sink = Arc::new(BufferSink::without_input());

    ctx.run("echo partial; echo broken >&2; exit 2", sink.clone(), &sh())
        .await
        .unwrap();

    assert_eq!(sink.stdout(), "partial\n");
    assert_eq!(sink.stderr(), "broken\n");
    assert_eq!(notices.all(), vec!["Error!".to_string()]);
}

#[tokio::test]
async fn test_invalid_executable_resolves_with_error_in_sink() {
    let notices = Arc::new(Notices::default());
    let ctx = context(OneShotOptions::default(), notices.clone());
    let sink = Arc::new(BufferSink::without_input());
    let command = RunCommand::new("/nonexistent/blockrun-missing", "--flag", "txt");

    let result = ctx.run("anything", sink.clone(), &command).await;

    assert!(result.is_ok());
    let stderr = sink.stderr();
    assert!(stderr.contains("/nonexistent/blockrun-missing"), "{}", stderr);
    assert!(stderr.contains("No such file"), "{}", stderr);
    assert_eq!(notices.all(), vec!["Error while executing code".to_string()]);
}

#[tokio::test]
async fn test_stop_without_invocation_is_a_no_op() {
    let ctx = context(OneShotOptions::default(), Arc::default());
    ctx.stop().await.unwrap();
    assert!(!ctx.is_closed());
}

#[tokio::test]
async fn test_new_run_supersedes_pending_one() {
    let ctx = context(OneShotOptions::default(), Arc::default());
    let slow_sink = Arc::new(BufferSink::without_input());

    let slow = {
        let ctx = ctx.clone();
        let sink = slow_sink.clone();
        tokio::spawn(async move { ctx.run("sleep 1; echo slow", sink, &sh()).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fast_sink = Arc::new(BufferSink::without_input());
    let fast = {
        let ctx = ctx.clone();
        let sink = fast_sink.clone();
        tokio::spawn(async move { ctx.run("echo fast", sink, &sh()).await })
    };

    tokio::time::timeout(Duration::from_millis(500), slow)
        .await
        .expect("superseded run should resolve before its process exits")
        .unwrap()
        .unwrap();
    fast.await.unwrap().unwrap();
    assert_eq!(fast_sink.stdout(), "fast\n");

    // The superseded process still finishes and reports into its own sink.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(slow_sink.stdout(), "slow\n");
}

#[tokio::test]
async fn test_kill_handle_stops_running_block() {
    let ctx = context(OneShotOptions::default(), Arc::default());
    let sink = Arc::new(BufferSink::without_input());

    let run = {
        let ctx = ctx.clone();
        let sink = sink.clone();
        tokio::spawn(async move { ctx.run("sleep 30", sink, &sh()).await })
    };

    let handle = loop {
        if let Some(handle) = sink.kill_handle() {
            break handle;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    handle.kill().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("killed block should resolve")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_latin1_temp_file() {
    let options = OneShotOptions {
        encoding: blockrun_core::FileEncoding::Latin1,
        ..OneShotOptions::default()
    };
    let ctx = context(options, Arc::default());
    let sink = Arc::new(BufferSink::without_input());

    // `od` shows the raw bytes the script was written with.
    ctx.run("# é€\nod -An -tx1 \"$0\" | head -n 1", sink.clone(), &sh())
        .await
        .unwrap();

    let bytes = sink.stdout();
    assert!(bytes.contains("23 20 e9 3f"), "{}", bytes);
}

// =============================================================================
// Two-stage compile
// =============================================================================

/// A directory holding a `gcc` that is really `sh`.
///
/// The block text is then the "compiler": it receives `-o <binary>` as `$1 $2`.
fn fake_gcc() -> (TempDir, RunCommand) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let gcc = dir.path().join("gcc");
    std::os::unix::fs::symlink("/bin/sh", &gcc).expect("Failed to link fake gcc");
    let command = RunCommand::new(gcc.to_string_lossy(), "", "c");
    (dir, command)
}

#[tokio::test]
async fn test_compile_then_run_binary() {
    let (_dir, gcc) = fake_gcc();
    let ctx = context(OneShotOptions::default(), Arc::default());
    let sink = Arc::new(BufferSink::without_input());

    let compiler = r#"echo compiling
printf '#!/bin/sh\necho "binary $0"\n' > "$2"
chmod +x "$2""#;
    ctx.run(compiler, sink.clone(), &gcc).await.unwrap();

    // The sink is cleared between stages; only the binary's output remains.
    let stdout = sink.stdout();
    let binary = PathBuf::from(stdout.trim().strip_prefix("binary ").unwrap());
    assert_eq!(binary.extension().unwrap(), "out");
    assert!(!binary.exists(), "compiled binary should be removed");
    assert!(!binary.with_extension("c").exists(), "source should be removed");
    assert!(
        sink.events()
            .contains(&blockrun_core::SinkEvent::Stdout("compiling\n".to_string()))
    );
}

#[tokio::test]
async fn test_failed_compile_never_runs_binary() {
    let (dir, gcc) = fake_gcc();
    let marker = dir.path().join("binary-ran");
    let notices = Arc::new(Notices::default());
    let ctx = context(OneShotOptions::default(), notices.clone());
    let sink = Arc::new(BufferSink::without_input());

    let compiler = format!(
        "printf '#!/bin/sh\\ntouch {}\\n' > \"$2\"\nchmod +x \"$2\"\necho 'error: expected ;' >&2\nexit 1",
        marker.display()
    );
    tokio::time::timeout(Duration::from_secs(5), ctx.run(&compiler, sink.clone(), &gcc))
        .await
        .expect("failed compile should still resolve")
        .unwrap();

    assert_eq!(sink.stderr(), "error: expected ;\n");
    assert!(!marker.exists(), "binary must not run after a failed compile");
    assert_eq!(notices.all(), vec!["Error!".to_string()]);
}

// =============================================================================
// C family
// =============================================================================

#[tokio::test]
async fn test_c_family_renames_main_and_restores_output() {
    let options = OneShotOptions {
        flavor: OneShotFlavor::CFamily { use_main: true },
        ..OneShotOptions::default()
    };
    let ctx = context(options, Arc::default());
    let sink = Arc::new(BufferSink::without_input());

    // The "interpreter" prints the line holding the entry point.
    let code = "int main() { return 0; }\n";
    let command = RunCommand::new("grep", "-h int", "cpp");
    ctx.run(code, sink.clone(), &command).await.unwrap();

    assert_eq!(sink.stdout(), "int main() { return 0; }\n");
}

#[tokio::test]
async fn test_c_family_without_main_passes_lines_as_arguments() {
    let options = OneShotOptions {
        flavor: OneShotFlavor::CFamily { use_main: false },
        ..OneShotOptions::default()
    };
    let ctx = context(options, Arc::default());
    let sink = Arc::new(BufferSink::without_input());

    let command = RunCommand::new("printf", "%s|", "cpp");
    ctx.run("int x = 1;\nx", sink.clone(), &command).await.unwrap();

    assert_eq!(sink.stdout(), "int x = 1;|x|");
}
