//! Progress notifications for UI-facing transports.
//!
//! Delivery is best-effort and at most once. The job status query stays the
//! source of truth; a dropped event is never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::JobStatus;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub job_id: String,
    pub step: String,
    pub progress: u8,
    pub message: String,
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        step: impl Into<String>,
        progress: u8,
        message: impl Into<String>,
        status: JobStatus,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            step: step.into(),
            progress: progress.min(100),
            message: message.into(),
            status,
            at: Utc::now(),
        }
    }
}

/// Sink for progress events.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Fan-out over a `tokio::sync::broadcast` channel. Slow subscribers lag
/// and lose events; publishing with no subscribers drops the event.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("progress event dropped: no subscribers");
        }
    }
}
