//! Error types for the isolation layer.

use std::path::PathBuf;

/// Errors produced by an isolate.
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("invalid TEE policy: {0}")]
    InvalidPolicy(String),

    /// `execute` or `copy_*` called on an isolate that was never started.
    #[error("isolate not started")]
    NotStarted,

    #[error("command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Execution was cancelled, either by the caller or by `stop`.
    #[error("execution killed: {reason}")]
    Killed { reason: String },

    #[error("path escapes isolate working directory: {0}")]
    PathEscape(PathBuf),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TeeError {
    /// Whether the error came from cancellation rather than the command itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TeeError::Timeout { .. } | TeeError::Killed { .. })
    }
}

/// Result type for isolate operations.
pub type TeeResult<T> = std::result::Result<T, TeeError>;
