//! Compilation orchestrator: owns the job table and drives each job through
//! a local build or a remote CI run.
//!
//! Jobs only move forward (`queued`/`pending` -> `in_progress` -> terminal)
//! and a terminal job never changes again. Remote state is fetched without
//! holding the table lock; a failed fetch leaves the job untouched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use agentkiln_core::metrics::METRICS;
use agentkiln_core::obs::{emit_job_status, emit_job_submitted, emit_local_fallback, JobSpan};
use agentkiln_core::{
    new_job_id, AgentBuildSpec, BuildStrategy, CompilationJob, JobFailure, JobStatus, KilnError,
    ProgressEvent, ProgressPublisher, Result,
};
use chrono::Utc;
use tracing::{debug, info, warn, Instrument};

use crate::error::LocalBuildError;
use crate::local::LocalBuilder;
use crate::matcher::{match_artifact, ArtifactMatch};
use crate::provider::{CiProvider, DispatchInputs, WorkflowRun};

const PROGRESS_LOCAL_STARTED: u8 = 30;
const PROGRESS_DISPATCHED: u8 = 10;
const PROGRESS_REMOTE_QUEUED: u8 = 20;
const PROGRESS_REMOTE_RUNNING: u8 = 50;

/// What the provider reported for the run carrying a job.
#[derive(Debug)]
enum RemoteObservation {
    Queued,
    Running,
    Succeeded(Option<ArtifactMatch>),
    Failed {
        conclusion: String,
        failed_step: Option<String>,
    },
}

pub struct Orchestrator {
    local: Option<Arc<dyn LocalBuilder>>,
    remote: Option<Arc<dyn CiProvider>>,
    publisher: Arc<dyn ProgressPublisher>,
    jobs: RwLock<HashMap<String, CompilationJob>>,
    retention: Duration,
}

impl Orchestrator {
    /// Orchestrator with neither builder configured; add them with
    /// [`with_local_builder`](Self::with_local_builder) and
    /// [`with_remote`](Self::with_remote).
    pub fn new(publisher: Arc<dyn ProgressPublisher>) -> Self {
        Self {
            local: None,
            remote: None,
            publisher,
            jobs: RwLock::new(HashMap::new()),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_local_builder(mut self, builder: Arc<dyn LocalBuilder>) -> Self {
        self.local = Some(builder);
        self
    }

    pub fn with_remote(mut self, provider: Arc<dyn CiProvider>) -> Self {
        self.remote = Some(provider);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    // -------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------

    /// Validate `spec`, record a job and start building it.
    ///
    /// Returns the job id once the job is either running locally or the
    /// remote dispatch has been attempted. Dispatch failures are recorded on
    /// the job, not returned here; only an invalid spec is an error.
    pub async fn submit(self: &Arc<Self>, spec: AgentBuildSpec) -> Result<String> {
        spec.validate()?;
        let job_id = new_job_id();
        let job = CompilationJob::for_spec(&job_id, &spec)?;

        METRICS.inc_jobs_submitted();
        emit_job_submitted(&job_id, &job.agent_name, &job.spec_digest);
        self.publish(&job, "queued", "job queued");
        self.write_jobs().insert(job_id.clone(), job);

        let spec = Arc::new(spec);
        if let Some(local) = &self.local {
            match local.probe().await {
                Ok(()) => {
                    self.start_local(&job_id, spec, Arc::clone(local))?;
                    return Ok(job_id);
                }
                Err(reason) => self.note_local_fallback(&job_id, &reason),
            }
        }
        self.dispatch_remote(&job_id, &spec).await;
        Ok(job_id)
    }

    fn start_local(
        self: &Arc<Self>,
        job_id: &str,
        spec: Arc<AgentBuildSpec>,
        local: Arc<dyn LocalBuilder>,
    ) -> Result<()> {
        let job = self.update(job_id, |job| {
            job.strategy = BuildStrategy::Local;
            job.advance(JobStatus::InProgress)?;
            job.set_progress(PROGRESS_LOCAL_STARTED);
            job.log("local build started");
            Ok(())
        })?;
        self.publish(&job, "local_build", "local build started");

        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        let span = JobSpan::new(&job_id).into_span();
        tokio::spawn(
            async move {
                match local.build(&job_id, &spec).await {
                    Ok(artifact) => {
                        let message = format!("artifact {}", artifact.name);
                        this.settle(&job_id, "local_build", &message, |job| {
                            job.log(message.clone());
                            job.complete(Some(artifact))
                        });
                    }
                    Err(LocalBuildError::Unavailable(reason)) => {
                        this.note_local_fallback(&job_id, &reason);
                        this.dispatch_remote(&job_id, &spec).await;
                    }
                    Err(e) => {
                        let stage = match &e {
                            LocalBuildError::Failed { stage, .. } => Some(stage.clone()),
                            _ => None,
                        };
                        let failure = JobFailure::build(e.to_string(), stage);
                        this.settle(&job_id, "local_build", "local build failed", |job| {
                            job.fail(failure)
                        });
                    }
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    fn note_local_fallback(&self, job_id: &str, reason: &dyn std::fmt::Display) {
        METRICS.inc_local_fallbacks();
        emit_local_fallback(job_id, reason);
        let line = format!("local build unavailable: {reason}");
        if let Err(e) = self.update(job_id, |job| {
            job.log(line);
            Ok(())
        }) {
            debug!(error = %e, "job vanished before fallback was logged");
        }
    }

    async fn dispatch_remote(&self, job_id: &str, spec: &AgentBuildSpec) {
        let Some(remote) = self.remote.clone() else {
            let failure = JobFailure::dispatch(
                "local build unavailable and no remote CI provider configured",
                None,
            );
            self.settle(job_id, "dispatch", "no build path available", |job| {
                job.fail(failure)
            });
            return;
        };

        let config = match serde_json::to_string(spec) {
            Ok(config) => config,
            Err(e) => {
                let failure = JobFailure::dispatch(format!("cannot encode spec: {e}"), None);
                self.settle(job_id, "dispatch", "dispatch failed", |job| job.fail(failure));
                return;
            }
        };
        let inputs = DispatchInputs {
            job_id: job_id.to_string(),
            agent_name: spec.sanitized_name(),
            config,
            build_target: spec.build_target.as_str().to_string(),
            platform: spec.build_target.platform().to_string(),
        };

        let provider = remote.name().to_string();
        let prepared = self.update(job_id, |job| {
            job.strategy = BuildStrategy::Remote;
            if job.status == JobStatus::Queued {
                job.advance(JobStatus::Pending)?;
            }
            job.log(format!("dispatching remote build to {provider}"));
            Ok(())
        });
        if let Err(e) = prepared {
            warn!(job_id = %job_id, error = %e, "cannot prepare job for dispatch");
            return;
        }

        match remote.dispatch(&inputs).await {
            Ok(()) => {
                METRICS.inc_remote_dispatches();
                self.settle(job_id, "dispatch", "remote build dispatched", |job| {
                    job.set_progress(PROGRESS_DISPATCHED);
                    job.log("remote build dispatched");
                    Ok(())
                });
            }
            Err(e) => {
                warn!(job_id = %job_id, provider = %provider, error = %e, "remote dispatch failed");
                let failure = JobFailure::dispatch(e.to_string(), e.raw_body());
                self.settle(job_id, "dispatch", "remote dispatch failed", |job| {
                    job.fail(failure)
                });
            }
        }
    }

    // -------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------

    /// Current state of `job_id`, refreshed from the CI provider when the
    /// job is a non-terminal remote build.
    ///
    /// A provider error is returned as [`KilnError::StatusFetch`] and does
    /// not change the job.
    pub async fn get_status(&self, job_id: &str) -> Result<CompilationJob> {
        let job = self.snapshot(job_id)?;
        if job.is_terminal() || job.strategy != BuildStrategy::Remote {
            return Ok(job);
        }
        let Some(remote) = self.remote.as_deref() else {
            return Ok(job);
        };

        let runs = remote
            .list_runs()
            .await
            .map_err(|e| KilnError::StatusFetch(e.to_string()))?;
        let Some(run) = runs.into_iter().find(|r| r.mentions(job_id)) else {
            debug!(job_id = %job_id, "no workflow run mentions job yet");
            return Ok(job);
        };

        let observation = observe(remote, job_id, &run).await?;
        self.apply(job_id, run.id, observation)
    }

    fn apply(
        &self,
        job_id: &str,
        run_id: u64,
        observation: RemoteObservation,
    ) -> Result<CompilationJob> {
        let (before, after, step) = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| KilnError::JobNotFound(job_id.to_string()))?;
            if job.is_terminal() {
                return Ok(job.clone());
            }
            let before = (job.status, job.progress);
            if job.remote_run_id.is_none() {
                job.log(format!("tracking remote run {run_id}"));
            }
            job.remote_run_id = Some(run_id);

            let step = match observation {
                RemoteObservation::Queued => {
                    advance_if_forward(job, JobStatus::Queued);
                    job.set_progress(PROGRESS_REMOTE_QUEUED);
                    "remote_queued"
                }
                RemoteObservation::Running => {
                    advance_if_forward(job, JobStatus::InProgress);
                    job.set_progress(PROGRESS_REMOTE_RUNNING);
                    "remote_running"
                }
                RemoteObservation::Succeeded(matched) => {
                    match &matched {
                        Some(m) => job.log(format!(
                            "artifact {} ({} match)",
                            m.artifact.name,
                            m.tier.as_str()
                        )),
                        None => job.log("run succeeded without a matching artifact"),
                    }
                    job.complete(matched.map(|m| m.artifact))?;
                    "completed"
                }
                RemoteObservation::Failed {
                    conclusion,
                    failed_step,
                } => {
                    job.fail(JobFailure::build(
                        format!("remote run {run_id} concluded '{conclusion}'"),
                        failed_step,
                    ))?;
                    "failed"
                }
            };
            (before, job.clone(), step)
        };

        if before != (after.status, after.progress) {
            self.publish(&after, step, &format!("remote build {}", after.status));
        }
        Ok(after)
    }

    /// Record a remote job dispatched elsewhere so its status can be queried.
    pub fn track_remote(&self, job_id: &str, agent_name: &str) -> CompilationJob {
        self.write_jobs()
            .entry(job_id.to_string())
            .or_insert_with(|| {
                info!(job_id = %job_id, agent_name = %agent_name, "tracking external job");
                CompilationJob::tracked(job_id, agent_name)
            })
            .clone()
    }

    /// Fail a job whose client gave up polling. Terminal jobs are returned
    /// unchanged.
    pub fn fail_timed_out(&self, job_id: &str, attempts: u32) -> Result<CompilationJob> {
        let message = format!("no terminal status after {attempts} polls");
        let job = self.update(job_id, |job| {
            if !job.is_terminal() {
                job.fail(JobFailure::timeout(message.clone()))?;
            }
            Ok(())
        })?;
        if job.error.as_ref().is_some_and(|f| f.message == message) {
            self.publish(&job, "timeout", &message);
        }
        Ok(job)
    }

    // -------------------------------------------------------------------
    // Table maintenance
    // -------------------------------------------------------------------

    /// Every job, oldest first.
    pub fn list(&self) -> Vec<CompilationJob> {
        let mut jobs: Vec<CompilationJob> = self.read_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    pub fn remove(&self, job_id: &str) -> Result<CompilationJob> {
        self.write_jobs()
            .remove(job_id)
            .ok_or_else(|| KilnError::JobNotFound(job_id.to_string()))
    }

    /// Drop terminal jobs that finished longer ago than the retention
    /// window. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - retention;
        let mut jobs = self.write_jobs();
        let before = jobs.len();
        jobs.retain(|_, job| job.finished_at.map_or(true, |at| at > cutoff));
        let pruned = before - jobs.len();
        if pruned > 0 {
            info!(pruned, remaining = jobs.len(), "pruned expired jobs");
        }
        pruned
    }

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CompilationJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CompilationJob>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, job_id: &str) -> Result<CompilationJob> {
        self.read_jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| KilnError::JobNotFound(job_id.to_string()))
    }

    fn update(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut CompilationJob) -> Result<()>,
    ) -> Result<CompilationJob> {
        let mut jobs = self.write_jobs();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| KilnError::JobNotFound(job_id.to_string()))?;
        f(job)?;
        Ok(job.clone())
    }

    /// Apply `f` and publish; failures are logged since there is no caller
    /// to return them to.
    fn settle(
        &self,
        job_id: &str,
        step: &str,
        message: &str,
        f: impl FnOnce(&mut CompilationJob) -> Result<()>,
    ) {
        match self.update(job_id, f) {
            Ok(job) => self.publish(&job, step, message),
            Err(e) => warn!(job_id = %job_id, error = %e, "job update rejected"),
        }
    }

    fn publish(&self, job: &CompilationJob, step: &str, message: &str) {
        emit_job_status(&job.job_id, job.strategy, job.status, job.progress);
        self.publisher.publish(ProgressEvent::new(
            job.job_id.clone(),
            step,
            job.progress,
            message,
            job.status,
        ));
    }
}

/// Provider statuses arrive out of order across runs and retries; a status
/// that would move the job backwards is ignored.
fn advance_if_forward(job: &mut CompilationJob, to: JobStatus) {
    if let Err(e) = job.advance(to) {
        debug!(job_id = %job.job_id, error = %e, "ignoring stale provider status");
    }
}

async fn observe(
    remote: &dyn CiProvider,
    job_id: &str,
    run: &WorkflowRun,
) -> Result<RemoteObservation> {
    let fetch = |e: crate::error::CiError| KilnError::StatusFetch(e.to_string());
    let observation = match (run.status.as_deref(), run.conclusion.as_deref()) {
        (Some("completed"), Some("success")) => {
            let artifacts = remote.list_artifacts(run.id).await.map_err(fetch)?;
            let manifest = remote
                .deployment_manifest(run.id, &artifacts)
                .await
                .unwrap_or_else(|e| {
                    warn!(run_id = run.id, error = %e, "deployment manifest unreadable");
                    None
                });
            RemoteObservation::Succeeded(match_artifact(job_id, &artifacts, manifest.as_ref()))
        }
        (Some("completed"), conclusion) => {
            let failed_step = remote.failed_step(run.id).await.unwrap_or_else(|e| {
                warn!(run_id = run.id, error = %e, "cannot read failed step");
                None
            });
            RemoteObservation::Failed {
                conclusion: conclusion.unwrap_or("unknown").to_string(),
                failed_step,
            }
        }
        (Some("in_progress"), _) => RemoteObservation::Running,
        _ => RemoteObservation::Queued,
    };
    Ok(observation)
}
