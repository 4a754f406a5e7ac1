//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{JobSnapshot, JobStatus};

/// What happened to the job when the event was emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    ChunkCommitted,
    Finished,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Started => write!(f, "Started"),
            JobPhase::ChunkCommitted => write!(f, "Chunk committed"),
            JobPhase::Finished => write!(f, "Finished"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub phase: JobPhase,
    /// Job state right after the event.
    pub snapshot: JobSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn new(phase: JobPhase, snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.id.clone(),
            phase,
            snapshot,
            timestamp: Utc::now(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.snapshot.status
    }

    pub fn is_terminal(&self) -> bool {
        self.snapshot.is_terminal()
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
