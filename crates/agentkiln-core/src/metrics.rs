//! Process-wide counters for builds and tool calls.
//!
//! Increments are lock-free. [`Metrics::flush`] logs every value in one
//! `info!` event; the CLI calls it when a command finishes and the runtime
//! host on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    jobs_submitted: AtomicU64,
    local_fallbacks: AtomicU64,
    remote_dispatches: AtomicU64,
    poll_attempts: AtomicU64,
    artifact_fallbacks: AtomicU64,
    tool_calls: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            local_fallbacks: AtomicU64::new(0),
            remote_dispatches: AtomicU64::new(0),
            poll_attempts: AtomicU64::new(0),
            artifact_fallbacks: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_jobs_submitted(&self) {
        Self::bump(&self.jobs_submitted, "jobs_submitted");
    }

    pub fn inc_local_fallbacks(&self) {
        Self::bump(&self.local_fallbacks, "local_fallbacks");
    }

    pub fn inc_remote_dispatches(&self) {
        Self::bump(&self.remote_dispatches, "remote_dispatches");
    }

    pub fn inc_poll_attempts(&self) {
        Self::bump(&self.poll_attempts, "poll_attempts");
    }

    /// Artifact matched by a tier other than manifest or job id.
    pub fn inc_artifact_fallbacks(&self) {
        Self::bump(&self.artifact_fallbacks, "artifact_fallbacks");
    }

    pub fn inc_tool_calls(&self) {
        Self::bump(&self.tool_calls, "tool_calls");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_submitted = self.jobs_submitted(),
            local_fallbacks = self.local_fallbacks(),
            remote_dispatches = self.remote_dispatches(),
            poll_attempts = self.poll_attempts(),
            artifact_fallbacks = self.artifact_fallbacks(),
            tool_calls = self.tool_calls(),
        );
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn local_fallbacks(&self) -> u64 {
        self.local_fallbacks.load(Ordering::Relaxed)
    }

    pub fn remote_dispatches(&self) -> u64 {
        self.remote_dispatches.load(Ordering::Relaxed)
    }

    pub fn poll_attempts(&self) -> u64 {
        self.poll_attempts.load(Ordering::Relaxed)
    }

    pub fn artifact_fallbacks(&self) -> u64 {
        self.artifact_fallbacks.load(Ordering::Relaxed)
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for counter in [
            &self.jobs_submitted,
            &self.local_fallbacks,
            &self.remote_dispatches,
            &self.poll_attempts,
            &self.artifact_fallbacks,
            &self.tool_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
