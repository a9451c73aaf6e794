//! Structured lifecycle events for compilation jobs and subagents.
//!
//! Every emitter logs an `event = "<area>.<name>"` field so log pipelines can
//! key on it. Job-scoped work can run under a [`JobSpan`].

use tracing::span::Entered;
use tracing::{info, warn, Span};

use crate::domain::{BuildStrategy, JobStatus};

/// The `agentkiln.job` span, tagged with the job id.
///
/// Synchronous code enters it; async work takes the span with
/// [`into_span`](Self::into_span) and runs under `.instrument(..)`.
///
/// ```ignore
/// let span = JobSpan::new("compile-1f2e...");
/// let _guard = span.enter();
/// // every event below carries job_id
/// ```
pub struct JobSpan {
    span: Span,
}

impl JobSpan {
    pub fn new(job_id: &str) -> Self {
        Self {
            span: tracing::info_span!("agentkiln.job", job_id = %job_id),
        }
    }

    pub fn enter(&self) -> Entered<'_> {
        self.span.enter()
    }

    pub fn into_span(self) -> Span {
        self.span
    }
}

pub fn emit_job_submitted(job_id: &str, agent_name: &str, spec_digest: &str) {
    info!(
        event = "job.submitted",
        job_id = %job_id,
        agent_name = %agent_name,
        spec_digest = %spec_digest,
    );
}

pub fn emit_job_status(job_id: &str, strategy: BuildStrategy, status: JobStatus, progress: u8) {
    info!(
        event = "job.status",
        job_id = %job_id,
        strategy = ?strategy,
        status = %status,
        progress = progress,
    );
}

/// The local builder was unavailable and the job went remote.
pub fn emit_local_fallback(job_id: &str, reason: &dyn std::fmt::Display) {
    info!(event = "job.local_fallback", job_id = %job_id, reason = %reason);
}

/// Artifact resolved by a tier weaker than the job-id match.
pub fn emit_artifact_fallback(job_id: &str, tier: &str, artifact: &str) {
    warn!(
        event = "job.artifact_fallback",
        job_id = %job_id,
        tier = %tier,
        artifact = %artifact,
    );
}

pub fn emit_subagent_event(subagent_id: &str, action: &str, detail: Option<&str>) {
    info!(
        event = "subagent.lifecycle",
        subagent_id = %subagent_id,
        action = %action,
        detail = detail.unwrap_or(""),
    );
}
