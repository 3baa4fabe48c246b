//! In-memory job table with per-record locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
use crate::error::StoreError;
use crate::stages::START_CHECKPOINT;
use crate::worker::job::{Job, JobError, JobStatus, ProcessingResult};

/// Terminal write requested by a worker or the cancellation path.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Complete(ProcessingResult),
    Fail(JobError),
    Cancel,
}

impl Transition {
    fn target(&self) -> JobStatus {
        match self {
            Transition::Complete(_) => JobStatus::Completed,
            Transition::Fail(_) => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }
}

/// Result of a worker starting an attempt on a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptStart {
    /// The job is now `processing` on the given attempt.
    Started(Job),
    /// A pending cancellation was observed; the job is now `cancelled`.
    Cancelled(Job),
    /// The job reached a terminal state before the claim.
    AlreadyFinished(JobStatus),
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job was queued and is now `cancelled`.
    Cancelled(Job),
    /// The job is held by a worker, which will stop at its next stage boundary.
    Requested,
    /// The job was already terminal.
    Rejected(JobStatus),
}

impl CancelOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, CancelOutcome::Rejected(_))
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed + self.cancelled
    }

    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

type JobSlot = Arc<Mutex<Job>>;

/// Source of truth for job status and progress.
///
/// The map is guarded by a read-mostly lock and each record by its own mutex,
/// so writes to different jobs never contend. Every mutation publishes a
/// [`JobEvent`].
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobSlot>>,
    events: JobEventBroadcaster,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_events(JobEventBroadcaster::default())
    }

    pub fn with_events(events: JobEventBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// Inserts a new job. Ids are unique for the lifetime of the record.
    pub fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.write_index();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        self.events.send(JobEvent::from_job(JobEventKind::Queued, &job));
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.slot(id).map(|slot| lock_job(&slot).clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_index().contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.slot(id).map(|slot| lock_job(&slot).status)
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .slots()
            .iter()
            .map(|slot| lock_job(slot).clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for slot in self.slots() {
            counts.add(lock_job(&slot).status);
        }
        counts
    }

    /// Raises the progress of a processing job. Progress never goes down; the
    /// stored value is returned. Queued jobs are left untouched.
    pub fn update_progress(&self, id: &str, progress: u8) -> Result<u8, StoreError> {
        let slot = self.require(id)?;
        let mut job = lock_job(&slot);

        if job.status.is_terminal() {
            return Err(StoreError::Terminal {
                job_id: job.id.clone(),
                status: job.status,
            });
        }
        if job.status != JobStatus::Processing {
            return Ok(job.progress);
        }

        let progress = progress.min(100);
        if progress > job.progress {
            job.progress = progress;
            self.events.send(JobEvent::from_job(JobEventKind::Progress, &job));
        }
        Ok(job.progress)
    }

    /// Moves a claimed job into `processing` for `attempt`.
    ///
    /// A cancellation requested while the entry waited for its retry is
    /// honored here, before any stage runs.
    pub fn begin_attempt(&self, id: &str, attempt: u32) -> Result<AttemptStart, StoreError> {
        let slot = self.require(id)?;
        let mut job = lock_job(&slot);

        if job.status.is_terminal() {
            return Ok(AttemptStart::AlreadyFinished(job.status));
        }
        if job.cancel_requested {
            finish(&mut job, JobStatus::Cancelled);
            self.events.send(JobEvent::from_job(JobEventKind::Cancelled, &job));
            return Ok(AttemptStart::Cancelled(job.clone()));
        }

        job.status = JobStatus::Processing;
        job.attempt = attempt;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        job.progress = job.progress.max(START_CHECKPOINT);
        self.events.send(JobEvent::from_job(JobEventKind::Started, &job));
        Ok(AttemptStart::Started(job.clone()))
    }

    /// Applies a terminal transition atomically.
    ///
    /// A completion or failure that races a pending cancellation request
    /// resolves to `cancelled`.
    pub fn transition(&self, id: &str, transition: Transition) -> Result<Job, StoreError> {
        let slot = self.require(id)?;
        let mut job = lock_job(&slot);

        if job.status.is_terminal() {
            return Err(StoreError::Terminal {
                job_id: job.id.clone(),
                status: job.status,
            });
        }

        let transition = if job.cancel_requested {
            Transition::Cancel
        } else {
            transition
        };
        let target = transition.target();
        if !job.status.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status,
                to: target,
            });
        }

        let kind = match transition {
            Transition::Complete(result) => {
                job.result = Some(result);
                job.progress = 100;
                JobEventKind::Completed
            }
            Transition::Fail(error) => {
                let message = error.message.clone();
                job.error = Some(error);
                finish(&mut job, target);
                let event = JobEvent::from_job(JobEventKind::Failed, &job).with_message(message);
                self.events.send(event);
                return Ok(job.clone());
            }
            Transition::Cancel => JobEventKind::Cancelled,
        };
        finish(&mut job, target);
        self.events.send(JobEvent::from_job(kind, &job));
        Ok(job.clone())
    }

    /// Cancels a queued job immediately, or flags a processing job for its
    /// worker to observe at the next stage boundary.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, StoreError> {
        let slot = self.require(id)?;
        let mut job = lock_job(&slot);

        match job.status {
            JobStatus::Queued => {
                finish(&mut job, JobStatus::Cancelled);
                self.events.send(JobEvent::from_job(JobEventKind::Cancelled, &job));
                Ok(CancelOutcome::Cancelled(job.clone()))
            }
            JobStatus::Processing => {
                job.cancel_requested = true;
                Ok(CancelOutcome::Requested)
            }
            status => Ok(CancelOutcome::Rejected(status)),
        }
    }

    /// Boolean form of [`cancel`](Self::cancel): false for terminal or
    /// unknown jobs.
    pub fn request_cancellation(&self, id: &str) -> bool {
        self.cancel(id).map(|o| o.accepted()).unwrap_or(false)
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.slot(id)
            .map(|slot| lock_job(&slot).cancel_requested)
            .unwrap_or(false)
    }

    /// Publishes a retry notice for a job that stays `processing` while its
    /// entry waits out the backoff.
    pub fn record_retry(&self, id: &str, message: impl Into<String>) {
        if let Some(slot) = self.slot(id) {
            let job = lock_job(&slot);
            self.events
                .send(JobEvent::from_job(JobEventKind::Retrying, &job).with_message(message));
        }
    }

    /// Removes a terminal job. Returns false when the job does not exist.
    pub fn purge(&self, id: &str) -> Result<bool, StoreError> {
        let mut jobs = self.write_index();
        let Some(slot) = jobs.get(id) else {
            return Ok(false);
        };
        let status = lock_job(slot).status;
        if !status.is_terminal() {
            return Err(StoreError::NotFinished {
                job_id: id.to_string(),
                status,
            });
        }
        jobs.remove(id);
        Ok(true)
    }

    /// Removes terminal jobs that finished before `cutoff`. Returns how many
    /// were removed.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.write_index();
        let before = jobs.len();
        jobs.retain(|_, slot| {
            let job = lock_job(slot);
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        before - jobs.len()
    }

    /// Drops a record whose admission failed.
    pub(crate) fn discard(&self, id: &str) -> Option<Job> {
        self.write_index()
            .remove(id)
            .map(|slot| lock_job(&slot).clone())
    }

    fn slot(&self, id: &str) -> Option<JobSlot> {
        self.read_index().get(id).cloned()
    }

    fn require(&self, id: &str) -> Result<JobSlot, StoreError> {
        self.slot(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn slots(&self) -> Vec<JobSlot> {
        self.read_index().values().cloned().collect()
    }

    fn read_index(&self) -> RwLockReadGuard<'_, HashMap<String, JobSlot>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<String, JobSlot>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn lock_job(slot: &JobSlot) -> MutexGuard<'_, Job> {
    match slot.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("Job record lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn finish(job: &mut Job, status: JobStatus) {
    job.status = status;
    job.cancel_requested = false;
    if job.completed_at.is_none() {
        job.completed_at = Some(Utc::now());
    }
}
