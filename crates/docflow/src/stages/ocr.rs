use std::sync::Arc;

use crate::error::StageError;
use crate::stages::{DocumentLoader, Stage, StageInput, StageKind, StageOutput};

/// Minimum length of a printable run to be kept.
const DEFAULT_MIN_RUN: usize = 4;

/// Recovers readable text from arbitrary document bytes by keeping runs of
/// printable characters. A stand-in for a real OCR engine, which plugs in
/// by registering its own `PerformOcr` stage.
pub struct OcrStage {
    documents: Arc<dyn DocumentLoader>,
    min_run: usize,
}

impl OcrStage {
    pub fn new(documents: Arc<dyn DocumentLoader>) -> Self {
        Self {
            documents,
            min_run: DEFAULT_MIN_RUN,
        }
    }

    pub fn with_min_run(mut self, min_run: usize) -> Self {
        self.min_run = min_run.max(1);
        self
    }
}

impl Stage for OcrStage {
    fn kind(&self) -> StageKind {
        StageKind::PerformOcr
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let bytes = self.documents.load(&input.document_id)?;
        Ok(StageOutput::OcrText(printable_runs(&bytes, self.min_run)))
    }
}

fn printable_runs(bytes: &[u8], min_run: usize) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();

    for ch in decoded.chars() {
        if ch.is_alphanumeric() || ch.is_ascii_punctuation() || ch == ' ' {
            current.push(ch);
        } else {
            flush_run(&mut current, &mut runs, min_run);
        }
    }
    flush_run(&mut current, &mut runs, min_run);

    runs.join(" ")
}

fn flush_run(current: &mut String, runs: &mut Vec<String>, min_run: usize) {
    let trimmed = current.trim();
    if trimmed.chars().count() >= min_run {
        runs.push(trimmed.to_string());
    }
    current.clear();
}
