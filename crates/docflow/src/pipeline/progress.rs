use std::sync::Arc;

use crate::broadcast::{JobEvent, JobEventKind};
use crate::stages::StageKind;
use crate::store::JobStore;

/// Events emitted by the pipeline during one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageStarted {
        stage: StageKind,
    },
    StageCompleted {
        stage: StageKind,
        progress: u8,
    },
    /// A cancellation request was observed before `next_stage` ran.
    Cancelled {
        next_stage: StageKind,
    },
    Failed {
        stage: StageKind,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Publishes stage-level detail on the job event channel. Numeric progress is
/// already published by the store when it is written.
pub struct BroadcastProgress {
    job_id: String,
    store: Arc<JobStore>,
}

impl BroadcastProgress {
    pub fn new(job_id: impl Into<String>, store: Arc<JobStore>) -> Self {
        Self {
            job_id: job_id.into(),
            store,
        }
    }

    fn publish(&self, message: String) {
        if let Some(job) = self.store.get(&self.job_id) {
            self.store
                .events()
                .send(JobEvent::from_job(JobEventKind::Progress, &job).with_message(message));
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => self.publish(format!("{} started", stage)),
            ProgressEvent::Failed { stage, error } => {
                self.publish(format!("{} failed: {}", stage, error))
            }
            ProgressEvent::StageCompleted { .. } | ProgressEvent::Cancelled { .. } => {}
        }
    }
}
