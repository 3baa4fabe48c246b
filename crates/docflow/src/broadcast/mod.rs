//! Broadcasting of job lifecycle events for real-time streaming.
//!
//! Any integration (UI, log sink, metrics exporter) can subscribe without the
//! workers knowing about it.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster, JobEventKind};
