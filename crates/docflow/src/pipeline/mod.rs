pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::StageFailure;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{Pipeline, PipelineOutcome};
