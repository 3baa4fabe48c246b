use crate::queue::QueuePayload;
use crate::stages::StageInput;
use crate::worker::job::{JobConfig, ProcessingResult};

/// State carried through one attempt of the pipeline.
pub struct PipelineContext {
    pub job_id: String,
    pub document_id: String,
    pub attempt: u32,
    pub config: JobConfig,

    // Grows by one output per completed stage
    pub result: ProcessingResult,
}

impl PipelineContext {
    pub fn new(payload: &QueuePayload) -> Self {
        Self {
            job_id: payload.job_id.clone(),
            document_id: payload.document_id.clone(),
            attempt: payload.attempt,
            config: payload.config.clone(),
            result: ProcessingResult::default(),
        }
    }

    /// Snapshot handed to the next stage.
    pub fn stage_input(&self) -> StageInput {
        StageInput {
            job_id: self.job_id.clone(),
            document_id: self.document_id.clone(),
            attempt: self.attempt,
            metadata: self.config.metadata.clone(),
            intermediate: self.result.clone(),
        }
    }
}
