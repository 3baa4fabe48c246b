//! Priority- and delay-aware admission queue with leased claims.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use crate::error::QueueError;
use crate::queue::backoff::RetryPolicy;
use crate::queue::entry::{ClaimedEntry, DeadLetter, EntryId, QueueDepth, QueueEntry, QueuePayload};
use crate::store::JobStore;
use crate::worker::job::{MAX_PRIORITY, MIN_PRIORITY};

pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

struct InFlight {
    entry: QueueEntry,
    worker_id: String,
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueueEntry>,
    in_flight: HashMap<EntryId, InFlight>,
    dead: Vec<DeadLetter>,
    /// Jobs with a pending or in-flight entry.
    live_jobs: HashSet<String>,
    next_id: u64,
    next_seq: u64,
    next_token: u64,
    closed: bool,
}

impl QueueState {
    fn next_id(&mut self) -> EntryId {
        self.next_id += 1;
        EntryId(self.next_id)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Index of the entry to serve next: highest priority, then earliest
    /// `available_at`, then lowest enqueue sequence.
    fn select(&self, now: Instant) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_ready(now))
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.available_at.cmp(&a.available_at))
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)
    }

    /// Puts entries whose lease ran out back into circulation with the same
    /// attempt number.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<EntryId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                warn!(
                    "Lease of worker {} on entry {} (job {}) expired, re-queueing attempt {}",
                    flight.worker_id,
                    id,
                    flight.entry.job_id(),
                    flight.entry.attempt()
                );
                let mut entry = flight.entry;
                entry.available_at = now;
                self.pending.push(entry);
            }
        }
    }

    /// Earliest instant at which something may become claimable.
    fn next_wakeup(&self) -> Option<Instant> {
        let next_available = self.pending.iter().map(|e| e.available_at).min();
        let next_expiry = self.in_flight.values().map(|f| f.expires_at).min();
        match (next_available, next_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn take_in_flight(&mut self, claim: &ClaimedEntry) -> Result<InFlight, QueueError> {
        match self.in_flight.get(&claim.id()) {
            Some(flight) if flight.token == claim.lease_token => {}
            _ => return Err(QueueError::LeaseLost(claim.id())),
        }
        self.in_flight
            .remove(&claim.id())
            .ok_or(QueueError::LeaseLost(claim.id()))
    }
}

/// The admission queue.
///
/// Every job has at most one live entry, pending or in flight. Claims are
/// leased: a worker that stops extending its lease loses the entry to the
/// next claimer.
pub struct AdmissionQueue {
    store: Arc<JobStore>,
    policy: RetryPolicy,
    lease_duration: Duration,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl AdmissionQueue {
    pub fn new(store: Arc<JobStore>, policy: RetryPolicy, lease_duration: Duration) -> Self {
        Self {
            store,
            policy,
            lease_duration,
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Admits a stored job. Rejects unknown or finished jobs, jobs that
    /// already have a live entry, and priorities outside 1..=10.
    pub fn enqueue(
        &self,
        job_id: &str,
        priority: u8,
        delay: Duration,
    ) -> Result<EntryId, QueueError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(QueueError::InvalidPriority(priority));
        }
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(QueueError::JobFinished {
                job_id: job.id,
                status: job.status,
            });
        }

        let available_at = Instant::now()
            .checked_add(delay)
            .ok_or(QueueError::DelayOutOfRange(delay))?;

        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.live_jobs.contains(job_id) {
            return Err(QueueError::AlreadyQueued(job_id.to_string()));
        }

        let id = state.next_id();
        let seq = state.next_seq();
        let entry = QueueEntry {
            id,
            payload: QueuePayload {
                job_id: job.id.clone(),
                document_id: job.document_id.clone(),
                config: job.config.clone(),
                attempt: 1,
            },
            priority,
            max_attempts: self.policy.max_attempts,
            available_at,
            enqueued_at: Utc::now(),
            seq,
        };
        state.live_jobs.insert(job.id.clone());
        state.pending.push(entry);
        drop(state);

        debug!(
            "Enqueued job {} as entry {} (priority {}, delay {:?})",
            job_id, id, priority, delay
        );
        self.available.notify_one();
        Ok(id)
    }

    /// Claims the best eligible entry, waiting up to `wait` for one to become
    /// available. Returns `None` on timeout or once the queue is closed. A
    /// `wait` too large to form a deadline waits until woken.
    pub fn claim_next(&self, worker_id: &str, wait: Duration) -> Option<ClaimedEntry> {
        let deadline = Instant::now().checked_add(wait);
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }

            let now = Instant::now();
            state.reclaim_expired(now);

            if let Some(index) = state.select(now) {
                let entry = state.pending.swap_remove(index);
                state.next_token += 1;
                let token = state.next_token;
                state.in_flight.insert(
                    entry.id,
                    InFlight {
                        entry: entry.clone(),
                        worker_id: worker_id.to_string(),
                        token,
                        expires_at: now + self.lease_duration,
                    },
                );
                debug!(
                    "Worker {} claimed entry {} (job {}, attempt {})",
                    worker_id,
                    entry.id,
                    entry.job_id(),
                    entry.attempt()
                );
                return Some(ClaimedEntry {
                    entry,
                    worker_id: worker_id.to_string(),
                    lease_token: token,
                });
            }

            if deadline.is_some_and(|d| now >= d) {
                return None;
            }
            let wake = match (state.next_wakeup(), deadline) {
                (Some(at), Some(d)) => Some(at.min(d)),
                (at, d) => at.or(d),
            };

            state = match wake {
                Some(at) => match self
                    .available
                    .wait_timeout(state, at.saturating_duration_since(now))
                {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => {
                        warn!("Admission queue lock was poisoned, recovering");
                        poisoned.into_inner().0
                    }
                },
                None => match self.available.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => {
                        warn!("Admission queue lock was poisoned, recovering");
                        poisoned.into_inner()
                    }
                },
            };
        }
    }

    /// Marks a claimed entry as done.
    pub fn ack(&self, claim: &ClaimedEntry) -> Result<(), QueueError> {
        let mut state = self.lock();
        let flight = state.take_in_flight(claim)?;
        state.live_jobs.remove(flight.entry.job_id());
        Ok(())
    }

    /// Re-queues a failed entry as the next attempt, claimable after `delay`.
    /// Returns the new attempt number. Fails with `AttemptsExhausted` when the
    /// entry was on its final attempt; it then stays claimed so the caller can
    /// dead-letter it.
    pub fn retry(&self, claim: &ClaimedEntry, delay: Duration) -> Result<u32, QueueError> {
        let mut state = self.lock();
        match state.in_flight.get(&claim.id()) {
            Some(flight) if flight.token == claim.lease_token => {
                if flight.entry.is_last_attempt() {
                    return Err(QueueError::AttemptsExhausted {
                        entry: claim.id(),
                        max_attempts: flight.entry.max_attempts,
                    });
                }
            }
            _ => return Err(QueueError::LeaseLost(claim.id())),
        }

        let flight = state.take_in_flight(claim)?;
        let mut entry = flight.entry;
        entry.id = state.next_id();
        entry.seq = state.next_seq();
        entry.payload.attempt += 1;
        entry.available_at = Instant::now() + delay;
        let attempt = entry.payload.attempt;
        let id = entry.id;
        state.pending.push(entry);
        drop(state);

        info!(
            "Job {} scheduled for attempt {} as entry {} in {:?}",
            claim.job_id(),
            attempt,
            id,
            delay
        );
        self.available.notify_one();
        Ok(attempt)
    }

    /// Removes a claimed entry from circulation for good.
    pub fn dead_letter(&self, claim: &ClaimedEntry, reason: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let flight = state.take_in_flight(claim)?;
        state.live_jobs.remove(flight.entry.job_id());
        warn!(
            "Dead-lettered entry {} (job {}) after attempt {}: {}",
            flight.entry.id,
            flight.entry.job_id(),
            flight.entry.attempt(),
            reason
        );
        state.dead.push(DeadLetter {
            entry_id: flight.entry.id,
            payload: flight.entry.payload,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    /// Pushes the lease expiry of a claimed entry out by the lease duration.
    pub fn extend_lease(&self, claim: &ClaimedEntry) -> Result<(), QueueError> {
        let mut state = self.lock();
        match state.in_flight.get_mut(&claim.id()) {
            Some(flight) if flight.token == claim.lease_token => {
                flight.expires_at = Instant::now() + self.lease_duration;
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(claim.id())),
        }
    }

    /// Removes the pending entry of a job. Returns false when the job has no
    /// pending entry (unknown, or currently held by a worker).
    pub fn withdraw(&self, job_id: &str) -> bool {
        let mut state = self.lock();
        let Some(index) = state.pending.iter().position(|e| e.job_id() == job_id) else {
            return false;
        };
        let entry = state.pending.swap_remove(index);
        state.live_jobs.remove(job_id);
        debug!("Withdrew entry {} of job {}", entry.id, job_id);
        true
    }

    pub fn depth(&self) -> QueueDepth {
        let state = self.lock();
        let now = Instant::now();
        let ready = state.pending.iter().filter(|e| e.is_ready(now)).count();
        QueueDepth {
            ready,
            delayed: state.pending.len() - ready,
            in_flight: state.in_flight.len(),
            dead_lettered: state.dead.len(),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    /// Stops handing out entries and wakes every waiting claimer. Entries in
    /// flight can still be acked, retried or dead-lettered.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Admission queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
