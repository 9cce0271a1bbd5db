//! Execution orchestration core for running embedded code blocks.
//!
//! This crate provides:
//! - A registry of execution contexts, one per (language, document)
//! - One-shot execution: a fresh process per block, with a two-stage compile route
//! - Session execution: a persistent interpreter with sigil-delimited blocks
//! - A serial job queue and process-tree teardown
//! - The output sink and notifier contracts hosts implement

pub mod context;
pub mod error;
pub mod kill;
pub mod language;
pub mod one_shot;
pub mod paths;
pub mod queue;
pub mod registry;
pub mod session;
pub mod settings;
pub mod sigil;
pub mod sink;
pub mod stream;
pub mod transform;

pub use context::{ClosedSignal, ExecutionContext, RunCommand};
pub use error::{Error, Result};
pub use kill::{KillHandle, kill_process_tree};
pub use language::Language;
pub use one_shot::{OneShotExecutor, OneShotFlavor, OneShotOptions};
pub use paths::InvocationToken;
pub use queue::JobQueue;
pub use registry::{ExecutorRegistry, RegistryEvent};
pub use session::{
    NodeRepl, PythonRepl, RRepl, ReplDialect, SessionExecutor, SessionLaunch, dialect_for,
};
pub use settings::{ExecutorSettings, FileEncoding, LanguageSettings};
pub use sigil::{SigilScanner, new_sigil};
pub use sink::{BufferSink, LogNotifier, Notifier, OutputSink, SinkEvent};
pub use stream::StreamSource;
pub use transform::{CodeTransform, GlobalInject};
