//! Domain-level error taxonomy for agentkiln.

use credential_vault::CredentialError;
use llm_router::LlmError;
use subagent_manager::SubagentError;
use tee_sandbox::TeeError;

use super::job::{FailureKind, JobFailure, JobStatus};
use crate::tools::ToolError;

/// The five user-visible failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid spec, policy or settings. Caught before anything runs.
    Configuration,
    /// Remote trigger or provider call failed.
    Dispatch,
    /// The build itself failed.
    Build,
    /// Polling exhausted without a terminal state.
    Timeout,
    /// Subagent, isolate or tool failure after a successful build.
    Runtime,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Dispatch => "dispatch",
            ErrorKind::Build => "build",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Runtime => "runtime",
        };
        f.write_str(s)
    }
}

/// agentkiln domain errors.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    #[error("invalid build spec: {0}")]
    InvalidSpec(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("dispatch failed: {message}")]
    Dispatch {
        message: String,
        raw_body: Option<String>,
    },

    #[error("status fetch failed: {0}")]
    StatusFetch(String),

    #[error("job {job_id} failed: {failure}")]
    JobFailed { job_id: String, failure: JobFailure },

    #[error("job {job_id} still not terminal after {attempts} polls")]
    PollTimedOut { job_id: String, attempts: u32 },

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("isolation error: {0}")]
    Tee(#[from] TeeError),

    #[error("subagent error: {0}")]
    Subagent(#[from] SubagentError),

    #[error("inference error: {0}")]
    Llm(#[from] LlmError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KilnError {
    /// Which of the five failure classes this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KilnError::InvalidSpec(_)
            | KilnError::Config(_)
            | KilnError::JobNotFound(_)
            | KilnError::Credential(_) => ErrorKind::Configuration,
            KilnError::Dispatch { .. } | KilnError::StatusFetch(_) => ErrorKind::Dispatch,
            KilnError::JobFailed { failure, .. } => match failure.kind {
                FailureKind::Dispatch => ErrorKind::Dispatch,
                FailureKind::Build => ErrorKind::Build,
                FailureKind::Timeout => ErrorKind::Timeout,
            },
            KilnError::PollTimedOut { .. } => ErrorKind::Timeout,
            KilnError::Tee(TeeError::InvalidPolicy(_)) => ErrorKind::Configuration,
            KilnError::Llm(LlmError::InvalidConfig(_) | LlmError::Credential(_)) => {
                ErrorKind::Configuration
            }
            KilnError::Llm(_) => ErrorKind::Dispatch,
            KilnError::InvalidTransition { .. }
            | KilnError::Tee(_)
            | KilnError::Subagent(_)
            | KilnError::Tool(_)
            | KilnError::Serialization(_)
            | KilnError::Io(_) => ErrorKind::Runtime,
        }
    }
}

/// Result type for agentkiln domain operations.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kiln_error_display() {
        let err = KilnError::InvalidSpec("version must be semver".to_string());
        assert!(err.to_string().contains("invalid build spec"));

        let err = KilnError::JobNotFound("compile-abc".to_string());
        assert!(err.to_string().contains("compile-abc"));
    }

    #[test]
    fn test_kind_follows_job_failure() {
        let err = KilnError::JobFailed {
            job_id: "compile-1".to_string(),
            failure: JobFailure::build("cargo build failed", Some("Build plugin".to_string())),
        };
        assert_eq!(err.kind(), ErrorKind::Build);

        let err = KilnError::JobFailed {
            job_id: "compile-1".to_string(),
            failure: JobFailure::dispatch("401 Unauthorized", None),
        };
        assert_eq!(err.kind(), ErrorKind::Dispatch);

        let err = KilnError::PollTimedOut {
            job_id: "compile-1".to_string(),
            attempts: 60,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_invalid_policy_is_configuration() {
        let err = KilnError::from(TeeError::InvalidPolicy("memory_mb must be > 0".to_string()));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = KilnError::from(TeeError::NotStarted);
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }
}
