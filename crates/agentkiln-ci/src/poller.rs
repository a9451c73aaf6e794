//! Client-side polling until a job reaches a terminal status.

use std::time::Duration;

use agentkiln_core::metrics::METRICS;
use agentkiln_core::{CompilationJob, FailureKind, JobStatus, KilnError, PollConfig};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::orchestrator::Orchestrator;

/// Final job plus every distinct status seen on the way.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub job: CompilationJob,
    pub observed: Vec<JobStatus>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(config.interval(), config.max_attempts)
    }

    /// Poll `job_id` until terminal, attempts run out, or `cancel` flips to
    /// `true`.
    ///
    /// Status fetch failures count as attempts and are retried. Running out
    /// of attempts marks the job failed with a timeout and returns
    /// [`PollError::TimedOut`].
    pub async fn poll(
        &self,
        orchestrator: &Orchestrator,
        job_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PollOutcome, PollError> {
        let mut observed: Vec<JobStatus> = Vec::new();

        for attempt in 1..=self.max_attempts {
            if *cancel.borrow() {
                return Err(PollError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }

            METRICS.inc_poll_attempts();
            match orchestrator.get_status(job_id).await {
                Ok(job) => {
                    if observed.last() != Some(&job.status) {
                        debug!(job_id = %job_id, status = %job.status, attempt, "status changed");
                        observed.push(job.status);
                    }
                    if job.is_terminal() {
                        return Ok(PollOutcome {
                            job,
                            observed,
                            attempts: attempt,
                        });
                    }
                }
                Err(KilnError::StatusFetch(reason)) => {
                    warn!(job_id = %job_id, attempt, reason = %reason, "status fetch failed, retrying");
                }
                Err(other) => return Err(PollError::Job(other)),
            }

            if attempt == self.max_attempts {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancelled(&mut cancel) => {
                    return Err(PollError::Cancelled { job_id: job_id.to_string() });
                }
            }
        }

        let job = orchestrator.fail_timed_out(job_id, self.max_attempts)?;
        let timed_out = job
            .error
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Timeout);
        if !timed_out {
            // Settled between the last poll and the timeout.
            return Ok(PollOutcome {
                job,
                observed,
                attempts: self.max_attempts,
            });
        }
        Err(PollError::TimedOut {
            job_id: job_id.to_string(),
            attempts: self.max_attempts,
            last_status: observed.last().copied(),
        })
    }
}

/// Resolves once the flag is set. A dropped sender means nobody can cancel.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let changed = rx.wait_for(|c| *c).await.map(|_| ());
    if changed.is_err() {
        std::future::pending::<()>().await;
    }
}
