use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::job::{Job, JobStatus, ProcessingResult};

/// Body of the owner callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    /// Failure cause, as a plain message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    /// Describes the job as it is now. `result` and `error` are only carried
    /// for completed and failed jobs respectively.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            timestamp: Utc::now(),
            result: match job.status {
                JobStatus::Completed => job.result.clone(),
                _ => None,
            },
            error: match job.status {
                JobStatus::Failed => job.error.as_ref().map(|e| e.message.clone()),
                _ => None,
            },
        }
    }
}
