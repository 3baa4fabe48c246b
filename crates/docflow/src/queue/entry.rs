use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::job::JobConfig;

/// Identifier of one queue entry. A retry gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub(crate) u64);

impl EntryId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work item handed to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePayload {
    pub job_id: String,
    pub document_id: String,
    pub config: JobConfig,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: EntryId,
    pub payload: QueuePayload,
    pub priority: u8,
    pub max_attempts: u32,
    /// Not claimable before this instant.
    pub available_at: Instant,
    pub enqueued_at: DateTime<Utc>,
    /// Enqueue sequence, breaks ties within a priority band.
    pub(crate) seq: u64,
}

impl QueueEntry {
    pub fn job_id(&self) -> &str {
        &self.payload.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.payload.attempt
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.available_at <= now
    }

    pub fn is_last_attempt(&self) -> bool {
        self.payload.attempt >= self.max_attempts
    }
}

/// An entry held by one worker under a lease.
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub entry: QueueEntry,
    pub worker_id: String,
    pub(crate) lease_token: u64,
}

impl ClaimedEntry {
    pub fn id(&self) -> EntryId {
        self.entry.id
    }

    pub fn job_id(&self) -> &str {
        self.entry.job_id()
    }

    pub fn attempt(&self) -> u32 {
        self.entry.attempt()
    }

    pub fn payload(&self) -> &QueuePayload {
        &self.entry.payload
    }
}

/// An entry removed from circulation after its final attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub entry_id: EntryId,
    pub payload: QueuePayload,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Entry counts by queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    /// Claimable now.
    pub ready: usize,
    /// Waiting for a delay or backoff to elapse.
    pub delayed: usize,
    /// Held by a worker.
    pub in_flight: usize,
    pub dead_lettered: usize,
}

impl QueueDepth {
    /// Entries that will still be processed.
    pub fn live(&self) -> usize {
        self.ready + self.delayed + self.in_flight
    }
}
