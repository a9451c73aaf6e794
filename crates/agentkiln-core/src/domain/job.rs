//! Compilation jobs and their status machine.
//!
//! A job moves `Queued/Pending -> InProgress -> {Completed, Failed}`. Ranks
//! never decrease, and nothing leaves a terminal state. Terminal fields
//! (`artifact`, `error`, `finished_at`) are written exactly once, by
//! [`CompilationJob::complete`] or [`CompilationJob::fail`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::build_spec::{AgentBuildSpec, BuildTarget};
use super::error::{KilnError, Result};

/// Status of a compilation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    /// Remote run dispatched but not yet located. Never reported by a CI provider.
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued | JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the build ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    Local,
    Remote,
}

/// Terminal failure classes recorded on a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Dispatch,
    Build,
    Timeout,
}

/// Why a job failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Provider response body, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
}

impl JobFailure {
    pub fn dispatch(message: impl Into<String>, raw_body: Option<String>) -> Self {
        Self {
            kind: FailureKind::Dispatch,
            message: message.into(),
            failed_step: None,
            raw_body,
        }
    }

    pub fn build(message: impl Into<String>, failed_step: Option<String>) -> Self {
        Self {
            kind: FailureKind::Build,
            message: message.into(),
            failed_step,
            raw_body: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
            failed_step: None,
            raw_body: None,
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.failed_step {
            Some(step) => write!(f, "{} (step '{}')", self.message, step),
            None => f.write_str(&self.message),
        }
    }
}

/// Download location of a finished build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactLocator {
    pub name: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// One tracked build attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationJob {
    pub job_id: String,
    pub spec_id: String,
    /// Empty for jobs adopted with `track_remote`.
    pub spec_digest: String,
    pub agent_name: String,
    pub build_target: BuildTarget,
    pub strategy: BuildStrategy,
    pub status: JobStatus,
    pub progress: u8,
    pub logs: Vec<String>,
    pub artifact: Option<ArtifactLocator>,
    pub error: Option<JobFailure>,
    pub remote_run_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fresh `compile-<uuid>` correlation id.
pub fn new_job_id() -> String {
    format!("compile-{}", uuid::Uuid::new_v4().simple())
}

impl CompilationJob {
    /// Queued job for `spec`.
    pub fn for_spec(job_id: impl Into<String>, spec: &AgentBuildSpec) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            job_id: job_id.into(),
            spec_id: spec.id.clone(),
            spec_digest: spec.digest()?,
            agent_name: spec.sanitized_name(),
            build_target: spec.build_target,
            strategy: BuildStrategy::Local,
            status: JobStatus::Queued,
            progress: 0,
            logs: Vec::new(),
            artifact: None,
            error: None,
            remote_run_id: None,
            started_at: now,
            finished_at: None,
            updated_at: now,
        })
    }

    /// Pending remote job dispatched elsewhere; only its id and name are known.
    pub fn tracked(job_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            spec_id: String::new(),
            spec_digest: String::new(),
            agent_name: agent_name.into(),
            build_target: BuildTarget::default(),
            strategy: BuildStrategy::Remote,
            status: JobStatus::Pending,
            progress: 0,
            logs: Vec::new(),
            artifact: None,
            error: None,
            remote_run_id: None,
            started_at: now,
            finished_at: None,
            updated_at: now,
        }
    }

    fn illegal(&self, to: JobStatus) -> KilnError {
        KilnError::InvalidTransition {
            job_id: self.job_id.clone(),
            from: self.status,
            to,
        }
    }

    /// Move to a non-terminal status. Same status is a no-op returning
    /// `false`; regressions and exits from a terminal state are errors.
    pub fn advance(&mut self, to: JobStatus) -> Result<bool> {
        if to == self.status {
            return Ok(false);
        }
        if self.status.is_terminal() || to.is_terminal() || to.rank() < self.status.rank() {
            return Err(self.illegal(to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Terminal success. `artifact` may be absent when no artifact matched.
    pub fn complete(&mut self, artifact: Option<ArtifactLocator>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.illegal(JobStatus::Completed));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.artifact = artifact;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.illegal(JobStatus::Failed));
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(failure);
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Raise progress; lower values are ignored.
    pub fn set_progress(&mut self, progress: u8) {
        let progress = progress.min(100);
        if progress > self.progress {
            self.progress = progress;
            self.updated_at = Utc::now();
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The terminal failure as an error value, for callers that want `?`.
    pub fn into_result(self) -> Result<Self> {
        match (&self.status, &self.error) {
            (JobStatus::Failed, Some(failure)) => Err(KilnError::JobFailed {
                job_id: self.job_id.clone(),
                failure: failure.clone(),
            }),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CompilationJob {
        CompilationJob::tracked("compile-1", "scraper")
    }

    #[test]
    fn test_job_id_format() {
        let id = new_job_id();
        assert!(id.starts_with("compile-"));
        assert_eq!(id.len(), "compile-".len() + 32);
    }

    #[test]
    fn test_forward_path() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.advance(JobStatus::InProgress).expect("advance"));
        assert!(!job.advance(JobStatus::InProgress).expect("same status"));
        job.complete(None).expect("complete");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_no_regression_from_in_progress() {
        let mut job = job();
        job.advance(JobStatus::InProgress).expect("advance");
        assert!(matches!(
            job.advance(JobStatus::Pending),
            Err(KilnError::InvalidTransition { .. })
        ));
        assert!(job.advance(JobStatus::Queued).is_err());
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = job();
        job.fail(JobFailure::build("boom", None)).expect("fail");
        assert!(job.advance(JobStatus::InProgress).is_err());
        assert!(job.complete(None).is_err());
        assert!(job.fail(JobFailure::timeout("late")).is_err());
        assert_eq!(job.error.as_ref().map(|e| e.message.as_str()), Some("boom"));
        assert!(job.artifact.is_none());
    }

    #[test]
    fn test_advance_refuses_terminal_targets() {
        let mut job = job();
        assert!(job.advance(JobStatus::Completed).is_err());
        assert!(job.advance(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.set_progress(40);
        job.set_progress(10);
        job.set_progress(250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_into_result_surfaces_failure() {
        let mut job = job();
        job.fail(JobFailure::dispatch("HTTP 422", Some("{\"message\":\"bad ref\"}".to_string())))
            .expect("fail");
        match job.into_result() {
            Err(KilnError::JobFailed { failure, .. }) => {
                assert_eq!(failure.kind, FailureKind::Dispatch);
                assert!(failure.raw_body.unwrap_or_default().contains("bad ref"));
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }
}
