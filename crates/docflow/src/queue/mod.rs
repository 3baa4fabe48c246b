pub mod admission;
pub mod backoff;
pub mod entry;

pub use admission::{AdmissionQueue, DEFAULT_LEASE};
pub use backoff::RetryPolicy;
pub use entry::{ClaimedEntry, DeadLetter, EntryId, QueueDepth, QueueEntry, QueuePayload};
