//! Run command implementation for blockrun CLI.
//!
//! Executes every runnable block of a document through the registry, in
//! document order, streaming output to the terminal.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use blockrun_core::transform::apply_all;
use blockrun_core::{
    CodeTransform, ExecutionContext, ExecutorRegistry, GlobalInject, Language, RunCommand,
};

use crate::colors;
use crate::config;
use crate::document::{CodeBlock, extract_blocks};
use crate::terminal::{TerminalNotifier, TerminalSink};

enum BlockOutcome {
    Finished,
    TimedOut,
    Interrupted,
}

/// Execute a document.
pub async fn execute(
    document: &Path,
    settings_path: Option<&Path>,
    language_filter: Option<&str>,
) -> anyhow::Result<()> {
    let start = Instant::now();

    if !document.exists() {
        anyhow::bail!("Document not found: {}", document.display());
    }
    let source = std::fs::read_to_string(document)
        .with_context(|| format!("Failed to read {}", document.display()))?;
    let settings = config::load(settings_path)?;
    let only = language_filter.map(str::parse::<Language>).transpose()?;

    let file = document
        .canonicalize()
        .unwrap_or_else(|_| document.to_path_buf())
        .display()
        .to_string();

    let mut runnable: Vec<(Language, CodeBlock)> = Vec::new();
    let mut skipped = 0;
    for block in extract_blocks(&source) {
        match block.tag.parse::<Language>() {
            Ok(language) if only.is_none_or(|l| l == language) => runnable.push((language, block)),
            Ok(_) => skipped += 1,
            Err(_) => {
                tracing::debug!("Skipping block at line {} with tag '{}'", block.line, block.tag);
                skipped += 1;
            }
        }
    }

    println!(
        "{}Running{} {} ({} blocks)",
        colors::BOLD,
        colors::RESET,
        document.display(),
        runnable.len()
    );
    if runnable.is_empty() {
        println!(
            "\n{}No runnable code blocks found in document.{}",
            colors::YELLOW,
            colors::RESET
        );
        return Ok(());
    }

    let timeout = match settings.timeout_ms {
        0 => Duration::MAX,
        ms => Duration::from_millis(ms),
    };
    let transforms: Vec<Box<dyn CodeTransform>> =
        vec![Box::new(GlobalInject::new(settings.clone()))];
    let registry = ExecutorRegistry::with_notifier(settings, Arc::new(TerminalNotifier));

    let mut executed = 0;
    for (index, (language, block)) in runnable.iter().enumerate() {
        println!(
            "\n{}[{}] {}{} {}line {}{}",
            colors::CYAN,
            index + 1,
            language,
            colors::RESET,
            colors::DIM,
            block.line,
            colors::RESET
        );

        let context = registry.get_executor_for(&file, *language, false)?;
        let code = apply_all(&transforms, &block.code, *language);
        let command = RunCommand::from_settings(&registry.settings().language(*language));
        let sink = Arc::new(TerminalSink::new());

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, context.run(&code, sink.clone(), &command)) => {
                match result {
                    Ok(result) => {
                        result?;
                        BlockOutcome::Finished
                    }
                    Err(_) => BlockOutcome::TimedOut,
                }
            }
            _ = tokio::signal::ctrl_c() => BlockOutcome::Interrupted,
        };

        match outcome {
            BlockOutcome::Finished => executed += 1,
            BlockOutcome::TimedOut => {
                eprintln!(
                    "{}Timed out{} after {:.1}s",
                    colors::RED,
                    colors::RESET,
                    timeout.as_secs_f64()
                );
                abort_block(&context, &sink).await;
                executed += 1;
            }
            BlockOutcome::Interrupted => {
                abort_block(&context, &sink).await;
                registry.stop_all().await?;
                anyhow::bail!("Interrupted");
            }
        }
    }

    registry.stop_all().await?;

    println!(
        "\n{}Completed{} {} blocks in {:.2}s{}",
        colors::GREEN,
        colors::RESET,
        executed,
        start.elapsed().as_secs_f64(),
        if skipped > 0 {
            format!(" ({} skipped)", skipped)
        } else {
            String::new()
        }
    );

    Ok(())
}

/// Kill whatever is still running for a block that will not be awaited.
async fn abort_block(context: &ExecutionContext, sink: &TerminalSink) {
    if let Some(handle) = sink.kill_handle() {
        if let Err(e) = handle.kill().await {
            tracing::warn!("Failed to kill block process: {}", e);
        }
    }
    if !context.is_one_shot() {
        if let Err(e) = context.stop().await {
            tracing::warn!("Failed to stop session: {}", e);
        }
    }
}
