pub mod executor;
pub mod job;
pub mod pool;

pub use executor::{JobExecutor, TerminalOutcome};
pub use job::{Job, JobConfig, JobError, JobStatus, ProcessingResult};
pub use pool::WorkerPool;
