pub mod index;
pub mod keywords;
pub mod language;
pub mod loader;
pub mod ocr;
pub mod summary;
pub mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;
use crate::worker::job::{JobConfig, ProcessingResult};

pub use index::{IndexDocument, MemorySearchIndex, SearchIndex, SearchIndexStage};
pub use keywords::KeywordStage;
pub use language::LanguageStage;
pub use loader::{DocumentLoader, FsDocumentLoader, MemoryDocumentLoader};
pub use ocr::OcrStage;
pub use summary::SummaryStage;
pub use text::TextExtractionStage;

/// Progress reported once a worker has claimed a job, before any stage runs.
pub const START_CHECKPOINT: u8 = 10;

/// The processing stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    ExtractText,
    #[serde(rename = "performOCR")]
    PerformOcr,
    ExtractKeywords,
    GenerateSummary,
    DetectLanguage,
    IndexForSearch,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::ExtractText,
        StageKind::PerformOcr,
        StageKind::ExtractKeywords,
        StageKind::GenerateSummary,
        StageKind::DetectLanguage,
        StageKind::IndexForSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::ExtractText => "extractText",
            StageKind::PerformOcr => "performOCR",
            StageKind::ExtractKeywords => "extractKeywords",
            StageKind::GenerateSummary => "generateSummary",
            StageKind::DetectLanguage => "detectLanguage",
            StageKind::IndexForSearch => "indexForSearch",
        }
    }

    /// Progress reached after this stage when every stage is enabled.
    pub fn checkpoint(&self) -> u8 {
        match self {
            StageKind::ExtractText => 30,
            StageKind::PerformOcr => 50,
            StageKind::ExtractKeywords => 70,
            StageKind::GenerateSummary => 85,
            StageKind::DetectLanguage => 95,
            StageKind::IndexForSearch => 100,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rescales the base checkpoints of `stages` (which must be in execution
/// order) so they stay strictly increasing and the last one lands on 100.
pub fn scaled_checkpoints(stages: &[StageKind]) -> Vec<u8> {
    let Some(last) = stages.last() else {
        return Vec::new();
    };
    let start = u32::from(START_CHECKPOINT);
    let span = u32::from(last.checkpoint()) - start;

    stages
        .iter()
        .map(|stage| {
            let offset = u32::from(stage.checkpoint()) - start;
            (start + offset * (100 - start) / span) as u8
        })
        .collect()
}

/// Everything a stage gets to see. Owned so it can cross into the stage's
/// timeout thread.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: String,
    pub document_id: String,
    pub attempt: u32,
    pub metadata: Option<Map<String, Value>>,
    /// Outputs of the stages that already ran in this attempt.
    pub intermediate: ProcessingResult,
}

impl StageInput {
    /// Text produced by an earlier stage, if any.
    pub fn text(&self) -> Option<&str> {
        self.intermediate.text()
    }

    /// Text from an earlier stage, falling back to the caller's `title` and
    /// `description` metadata when text and OCR extraction were skipped.
    pub fn text_or_metadata(&self) -> String {
        if let Some(text) = self.text() {
            return text.to_string();
        }

        let mut fallback = Vec::new();
        if let Some(metadata) = &self.metadata {
            for key in ["title", "description"] {
                if let Some(value) = metadata.get(key).and_then(Value::as_str) {
                    fallback.push(value);
                }
            }
        }
        fallback.join(". ")
    }
}

/// Output of a single stage, merged into the job's result.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    ExtractedText(String),
    OcrText(String),
    Keywords(Vec<String>),
    Summary(String),
    Language(String),
    SearchIndex(String),
}

/// A pluggable processing step.
///
/// Implementations may block (download, external analysis); each call runs on
/// its own thread under the pipeline's per-stage timeout.
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;
    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError>;
}

/// A stage scheduled for one job, with the progress it reports on success.
#[derive(Clone)]
pub struct PlannedStage {
    pub kind: StageKind,
    pub stage: Arc<dyn Stage>,
    pub checkpoint: u8,
}

impl fmt::Debug for PlannedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedStage")
            .field("kind", &self.kind)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: HashMap<StageKind, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in stage for every kind.
    pub fn with_defaults(
        documents: Arc<dyn DocumentLoader>,
        search_index: Arc<dyn SearchIndex>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextExtractionStage::new(Arc::clone(&documents))));
        registry.register(Arc::new(OcrStage::new(documents)));
        registry.register(Arc::new(KeywordStage::default()));
        registry.register(Arc::new(SummaryStage::default()));
        registry.register(Arc::new(LanguageStage::new()));
        registry.register(Arc::new(SearchIndexStage::new(search_index)));
        registry
    }

    /// Registers a stage for its kind, returning the one it replaced.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> Option<Arc<dyn Stage>> {
        self.stages.insert(stage.kind(), stage)
    }

    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn Stage>> {
        self.stages.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Resolves the enabled stages of `config` into an execution plan.
    pub fn plan(&self, config: &JobConfig) -> Result<Vec<PlannedStage>, StageError> {
        let kinds = config.enabled_stages();
        let checkpoints = scaled_checkpoints(&kinds);

        kinds
            .into_iter()
            .zip(checkpoints)
            .map(|(kind, checkpoint)| {
                let stage = self
                    .stages
                    .get(&kind)
                    .cloned()
                    .ok_or(StageError::NotRegistered(kind))?;
                Ok(PlannedStage {
                    kind,
                    stage,
                    checkpoint,
                })
            })
            .collect()
    }
}
