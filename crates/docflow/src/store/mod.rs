pub mod job_store;

pub use job_store::{AttemptStart, CancelOutcome, JobStore, StatusCounts, Transition};
