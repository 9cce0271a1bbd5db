//! Error types for blockrun-core.

use thiserror::Error;

use crate::language::Language;

/// Result type for blockrun-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blockrun-core.
///
/// Most per-block failures never surface as an `Error`: they are written to the
/// block's sink and announced through a notice, and `run` still returns `Ok`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A child process could not be spawned.
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// Tearing down a process tree failed.
    #[error("failed to kill process tree {pid}: {message}")]
    Kill { pid: u32, message: String },

    /// Invalid or unreadable settings.
    #[error("settings error: {0}")]
    Settings(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The language is configured for session mode but has no session dialect.
    #[error("attempted to use interactive executor for '{0}' but no such executor exists")]
    NoInteractiveExecutor(Language),

    /// A language tag that is not recognised.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// A queued job failed in a way that could not be reported to a sink.
    #[error("job failed: {0}")]
    JobFailed(String),
}
