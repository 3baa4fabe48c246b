use std::sync::Arc;
use std::thread;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, info_span, warn};

use crate::error::StageError;
use crate::stages::{PlannedStage, StageKind, StageOutput, StageRegistry};
use crate::store::JobStore;
use crate::worker::job::ProcessingResult;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::StageFailure;
use super::progress::{ProgressEvent, ProgressReporter};

/// How one attempt ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(ProcessingResult),
    /// A cancellation request was observed at a stage boundary.
    Cancelled,
    Failed(StageFailure),
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<StageRegistry>,
    store: Arc<JobStore>,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        registry: Arc<StageRegistry>,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Runs the enabled stages of one attempt in order.
    ///
    /// Stage errors never escape: they end the attempt as
    /// [`PipelineOutcome::Failed`]. Progress is written to the job store after
    /// each stage.
    pub fn run(&self, mut ctx: PipelineContext, progress: &dyn ProgressReporter) -> PipelineOutcome {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job_id,
            document_id = %ctx.document_id,
            attempt = ctx.attempt,
        )
        .entered();

        let plan = match self.registry.plan(&ctx.config) {
            Ok(plan) => plan,
            Err(error) => {
                let stage = match &error {
                    StageError::NotRegistered(kind) => *kind,
                    _ => ctx
                        .config
                        .enabled_stages()
                        .first()
                        .copied()
                        .unwrap_or(StageKind::ExtractText),
                };
                warn!("Cannot plan job {}: {}", ctx.job_id, error);
                progress.report(ProgressEvent::Failed {
                    stage,
                    error: error.to_string(),
                });
                return PipelineOutcome::Failed(StageFailure::new(stage, error));
            }
        };
        debug!("Planned {} stage(s) for job {}", plan.len(), ctx.job_id);

        for planned in plan {
            if self.store.is_cancel_requested(&ctx.job_id) {
                info!(
                    "Job {} cancelled before {} stage",
                    ctx.job_id, planned.kind
                );
                progress.report(ProgressEvent::Cancelled {
                    next_stage: planned.kind,
                });
                return PipelineOutcome::Cancelled;
            }

            let _step = info_span!("stage", stage = %planned.kind).entered();
            progress.report(ProgressEvent::StageStarted {
                stage: planned.kind,
            });

            match self.execute_stage(&planned, &ctx) {
                Ok(output) => {
                    ctx.result.merge(output);
                    let reached = match self.store.update_progress(&ctx.job_id, planned.checkpoint) {
                        Ok(reached) => reached,
                        Err(e) => {
                            warn!("Could not record progress for job {}: {}", ctx.job_id, e);
                            planned.checkpoint
                        }
                    };
                    debug!("{} stage done, progress {}", planned.kind, reached);
                    progress.report(ProgressEvent::StageCompleted {
                        stage: planned.kind,
                        progress: reached,
                    });
                }
                Err(error) => {
                    warn!(
                        "{} stage failed for job {} on attempt {}: {}",
                        planned.kind, ctx.job_id, ctx.attempt, error
                    );
                    progress.report(ProgressEvent::Failed {
                        stage: planned.kind,
                        error: error.to_string(),
                    });
                    return PipelineOutcome::Failed(StageFailure::new(planned.kind, error));
                }
            }
        }

        PipelineOutcome::Completed(ctx.result)
    }

    /// Runs a stage on its own thread so a hung or panicking stage cannot take
    /// the worker down with it. A timed-out stage thread is left to finish on
    /// its own; its output is discarded.
    fn execute_stage(
        &self,
        planned: &PlannedStage,
        ctx: &PipelineContext,
    ) -> Result<StageOutput, StageError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let stage = Arc::clone(&planned.stage);
        let input = ctx.stage_input();

        thread::Builder::new()
            .name(format!("stage-{}", planned.kind))
            .spawn(move || {
                let result = stage.execute(&input);
                let _ = tx.send(result);
            })
            .map_err(|e| StageError::Failed(format!("failed to spawn stage thread: {}", e)))?;

        match rx.recv_timeout(self.config.stage_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StageError::Timeout {
                stage: planned.kind,
                timeout: self.config.stage_timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StageError::Panicked(planned.kind)),
        }
    }
}
