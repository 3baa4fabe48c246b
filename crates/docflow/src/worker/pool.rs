use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::executor::JobExecutor;

/// Fixed set of threads, each looping claim, run, settle.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    executor: Arc<JobExecutor>,
}

impl WorkerPool {
    pub fn start(
        executor: Arc<JobExecutor>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_executor = Arc::clone(&executor);

            let spawned = thread::Builder::new()
                .name(format!("docflow-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, worker_executor, shutdown_flag, poll_interval);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop the ones already running before reporting.
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            workers,
            shutdown,
            executor,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue and asks workers to stop. A worker finishes the entry
    /// it holds first.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.executor.queue().close();
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    executor: Arc<JobExecutor>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);
    let name = format!("worker-{}", worker_id);
    let queue = Arc::clone(executor.queue());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match queue.claim_next(&name, poll_interval) {
            Some(claim) => {
                let outcome = executor.handle(claim);
                debug!("Worker {} settled entry: {:?}", worker_id, outcome);
            }
            None if queue.is_closed() => {
                debug!("Worker {} queue closed", worker_id);
                break;
            }
            None => continue,
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationSender;
    use crate::pipeline::{Pipeline, PipelineConfig};
    use crate::queue::{AdmissionQueue, RetryPolicy};
    use crate::stages::{MemoryDocumentLoader, StageKind, StageRegistry, TextExtractionStage};
    use crate::store::JobStore;
    use crate::worker::job::{Job, JobConfig, JobStatus};
    use std::time::Instant;

    fn executor() -> (Arc<JobStore>, Arc<AdmissionQueue>, Arc<JobExecutor>) {
        let store = Arc::new(JobStore::new());
        let queue = Arc::new(AdmissionQueue::new(
            store.clone(),
            RetryPolicy::default(),
            Duration::from_secs(60),
        ));
        let loader = Arc::new(MemoryDocumentLoader::new().with_document("doc", "Some text."));
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(TextExtractionStage::new(loader)));
        let pipeline = Pipeline::new(
            Arc::new(PipelineConfig::default()),
            Arc::new(registry),
            store.clone(),
        );
        let executor = Arc::new(JobExecutor::new(
            pipeline,
            store.clone(),
            queue.clone(),
            NotificationSender::disabled(),
            false,
        ));
        (store, queue, executor)
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (_, _, executor) = executor();
        assert!(matches!(
            WorkerPool::start(executor, 0, Duration::from_millis(10)),
            Err(WorkerError::NoWorkers)
        ));
    }

    #[test]
    fn test_pool_processes_jobs_and_stops() {
        let (store, queue, executor) = executor();
        let pool = WorkerPool::start(executor, 2, Duration::from_millis(20)).unwrap();
        assert_eq!(pool.worker_count(), 2);

        for i in 0..5 {
            let id = format!("job-{}", i);
            store
                .create(Job::new(&id, "doc", None, JobConfig::only(&[StageKind::ExtractText])))
                .unwrap();
            queue.enqueue(&id, 5, Duration::ZERO).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while store.counts().completed < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(queue.is_closed());
        pool.wait();

        for i in 0..5 {
            assert_eq!(
                store.status(&format!("job-{}", i)),
                Some(JobStatus::Completed)
            );
        }
    }
}
