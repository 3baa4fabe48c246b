//! Job lifecycle broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::{Job, JobStatus};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Queued,
    Started,
    Progress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEventKind::Queued => write!(f, "Queued"),
            JobEventKind::Started => write!(f, "Started"),
            JobEventKind::Progress => write!(f, "Progress"),
            JobEventKind::Retrying => write!(f, "Retrying"),
            JobEventKind::Completed => write!(f, "Completed"),
            JobEventKind::Failed => write!(f, "Failed"),
            JobEventKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Lifecycle event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub kind: JobEventKind,
    /// Job status after the event.
    pub status: JobStatus,
    pub progress: u8,
    pub attempt: u32,
    /// Human-readable detail (stage name, error message, retry delay).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Creates an event describing the current state of `job`.
    pub fn from_job(kind: JobEventKind, job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind,
            status: job.status,
            progress: job.progress,
            attempt: job.attempt,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Broadcasts job events to any number of subscribers. Events sent while
/// nobody listens are dropped.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
