use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::queue::{AdmissionQueue, QueueDepth};
use crate::store::JobStore;

/// Point-in-time counts. The five status counts always sum to `total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub queue: QueueDepth,
    pub taken_at: DateTime<Utc>,
}

/// Read-only view over the store and the queue.
pub struct StatsAggregator {
    store: Arc<JobStore>,
    queue: Arc<AdmissionQueue>,
}

impl StatsAggregator {
    pub fn new(store: Arc<JobStore>, queue: Arc<AdmissionQueue>) -> Self {
        Self { store, queue }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counts = self.store.counts();
        StatsSnapshot {
            queued: counts.queued,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            total: counts.total(),
            queue: self.queue.depth(),
            taken_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{RetryPolicy, DEFAULT_LEASE};
    use crate::store::Transition;
    use crate::worker::job::{Job, JobConfig};
    use std::time::Duration;

    #[test]
    fn test_counts_sum_to_total() {
        let store = Arc::new(JobStore::new());
        let queue = Arc::new(AdmissionQueue::new(
            store.clone(),
            RetryPolicy::default(),
            DEFAULT_LEASE,
        ));
        let stats = StatsAggregator::new(store.clone(), queue.clone());

        for id in ["a", "b", "c", "d"] {
            store
                .create(Job::new(id, "doc", None, JobConfig::default()))
                .unwrap();
        }
        queue.enqueue("a", 5, Duration::ZERO).unwrap();
        queue.enqueue("b", 5, Duration::from_secs(60)).unwrap();
        store.cancel("c").unwrap();
        store.begin_attempt("d", 1).unwrap();
        store
            .transition("d", Transition::Complete(Default::default()))
            .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.queued, 2);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.total, 4);
        assert_eq!(
            snapshot.queued
                + snapshot.processing
                + snapshot.completed
                + snapshot.failed
                + snapshot.cancelled,
            snapshot.total
        );
        assert_eq!(snapshot.queue.ready, 1);
        assert_eq!(snapshot.queue.delayed, 1);
        assert_eq!(snapshot.queue.in_flight, 0);
    }
}
