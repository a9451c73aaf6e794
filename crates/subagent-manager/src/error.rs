//! Error types for subagent-manager

use thiserror::Error;

/// Errors from subagent lifecycle and tool calls
#[derive(Error, Debug)]
pub enum SubagentError {
    #[error("invalid subagent descriptor: {0}")]
    InvalidDescriptor(String),

    /// Live set already holds the configured maximum
    #[error("subagent capacity reached ({max} concurrent)")]
    CapacityExceeded { max: usize },

    #[error("subagent already exists: {0}")]
    Duplicate(String),

    #[error("subagent not found: {0}")]
    NotFound(String),

    #[error("subagent '{0}' is not running")]
    NotRunning(String),

    #[error("subagent '{subagent}' has no tool '{tool}'")]
    UnknownTool { subagent: String, tool: String },

    /// In-flight call ended because the subagent was stopped or the caller cancelled
    #[error("tool call on subagent '{subagent}' killed: {reason}")]
    Killed { subagent: String, reason: String },

    #[error("tool '{tool}' failed with exit code {exit_code}: {stderr}")]
    ToolFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("dependency install failed for '{subagent}': {stderr}")]
    DependencyInstall { subagent: String, stderr: String },

    /// Teardown problems; the subagent was still removed from the live set
    #[error("cleanup of subagent '{id}' reported errors: {}", .errors.join("; "))]
    Cleanup { id: String, errors: Vec<String> },

    #[error("isolation error: {0}")]
    Tee(#[from] tee_sandbox::TeeError),

    #[error("credential error: {0}")]
    Credential(#[from] credential_vault::CredentialError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for subagent operations
pub type Result<T> = std::result::Result<T, SubagentError>;
