use thiserror::Error;

use crate::error::StageError;
use crate::stages::StageKind;

/// The stage that aborted an attempt and why.
#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: StageKind,
    #[source]
    pub error: StageError,
}

impl StageFailure {
    pub fn new(stage: StageKind, error: StageError) -> Self {
        Self { stage, error }
    }
}
