//! Error types for the orchestrator's collaborators.

use agentkiln_core::{JobStatus, KilnError};
use credential_vault::CredentialError;
use thiserror::Error;

/// Local build outcome other than success.
#[derive(Debug, Error)]
pub enum LocalBuildError {
    /// No usable toolchain here; the caller should build remotely.
    #[error("local build unavailable: {0}")]
    Unavailable(String),

    /// The build ran and failed.
    #[error("local build failed at '{stage}': {message}")]
    Failed { stage: String, message: String },

    #[error("local build io error: {0}")]
    Io(#[from] std::io::Error),
}

/// CI provider API failure.
#[derive(Debug, Error)]
pub enum CiError {
    #[error("remote CI not configured: {0}")]
    NotConfigured(String),

    #[error("CI credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("CI request failed: {0}")]
    Request(String),

    #[error("CI API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid CI response: {0}")]
    InvalidResponse(String),
}

impl CiError {
    /// Provider response body, when there was one.
    pub fn raw_body(&self) -> Option<String> {
        match self {
            CiError::Api { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

impl From<CiError> for KilnError {
    fn from(err: CiError) -> Self {
        match err {
            CiError::Credential(e) => KilnError::Credential(e),
            CiError::NotConfigured(message) => KilnError::Config(message),
            other => KilnError::Dispatch {
                raw_body: other.raw_body(),
                message: other.to_string(),
            },
        }
    }
}

/// Why client-side polling stopped without a terminal job.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("job {job_id} not terminal after {attempts} attempts (last status: {last_status:?})")]
    TimedOut {
        job_id: String,
        attempts: u32,
        last_status: Option<JobStatus>,
    },

    #[error("polling for job {job_id} cancelled")]
    Cancelled { job_id: String },

    #[error(transparent)]
    Job(#[from] KilnError),
}

impl From<PollError> for KilnError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::TimedOut {
                job_id, attempts, ..
            } => KilnError::PollTimedOut { job_id, attempts },
            PollError::Cancelled { job_id } => {
                KilnError::StatusFetch(format!("polling for {job_id} cancelled"))
            }
            PollError::Job(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentkiln_core::ErrorKind;

    #[test]
    fn test_api_error_keeps_body() {
        let err = CiError::Api {
            status: 422,
            body: r#"{"message":"Unexpected inputs provided"}"#.to_string(),
        };
        assert!(err.raw_body().unwrap_or_default().contains("Unexpected inputs"));

        let kiln: KilnError = err.into();
        assert_eq!(kiln.kind(), ErrorKind::Dispatch);
    }

    #[test]
    fn test_poll_timeout_is_timeout_kind() {
        let kiln: KilnError = PollError::TimedOut {
            job_id: "compile-1".to_string(),
            attempts: 60,
            last_status: Some(JobStatus::InProgress),
        }
        .into();
        assert_eq!(kiln.kind(), ErrorKind::Timeout);
    }
}
