use std::sync::Arc;

use crate::error::StageError;
use crate::stages::{DocumentLoader, Stage, StageInput, StageKind, StageOutput};

/// Decodes the document as text. Invalid UTF-8 sequences are replaced rather
/// than failing the job; line endings are normalized to `\n`.
pub struct TextExtractionStage {
    documents: Arc<dyn DocumentLoader>,
}

impl TextExtractionStage {
    pub fn new(documents: Arc<dyn DocumentLoader>) -> Self {
        Self { documents }
    }
}

impl Stage for TextExtractionStage {
    fn kind(&self) -> StageKind {
        StageKind::ExtractText
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let bytes = self.documents.load(&input.document_id)?;
        let text = normalize_text(&String::from_utf8_lossy(&bytes));
        Ok(StageOutput::ExtractedText(text))
    }
}

pub(crate) fn normalize_text(raw: &str) -> String {
    let text = raw
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    text.trim().to_string()
}
