use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stages::{StageKind, StageOutput};

/// Default priority for jobs that do not specify one.
pub const DEFAULT_PRIORITY: u8 = 5;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `processing -> processing` is allowed so a retried attempt can be
    /// re-entered without the job flickering back to `queued`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Processing) | (Queued, Failed) | (Queued, Cancelled) => true,
            (Processing, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// Per-job processing configuration.
///
/// Every field is optional on the wire: all stages are enabled except OCR and
/// the priority defaults to 5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default = "default_true")]
    pub extract_text: bool,
    #[serde(rename = "performOCR", default)]
    pub perform_ocr: bool,
    #[serde(default = "default_true")]
    pub extract_keywords: bool,
    #[serde(default = "default_true")]
    pub generate_summary: bool,
    #[serde(default = "default_true")]
    pub detect_language: bool,
    #[serde(default = "default_true")]
    pub index_for_search: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Opaque caller metadata, passed through unmodified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            extract_text: true,
            perform_ocr: false,
            extract_keywords: true,
            generate_summary: true,
            detect_language: true,
            index_for_search: true,
            priority: DEFAULT_PRIORITY,
            metadata: None,
        }
    }
}

impl JobConfig {
    /// A config with every stage enabled, OCR included.
    pub fn all_stages() -> Self {
        Self {
            perform_ocr: true,
            ..Self::default()
        }
    }

    /// A config with exactly the given stages enabled.
    pub fn only(stages: &[StageKind]) -> Self {
        let mut config = Self {
            extract_text: false,
            perform_ocr: false,
            extract_keywords: false,
            generate_summary: false,
            detect_language: false,
            index_for_search: false,
            ..Self::default()
        };
        for stage in stages {
            config.set_stage(*stage, true);
        }
        config
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_stage_enabled(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::ExtractText => self.extract_text,
            StageKind::PerformOcr => self.perform_ocr,
            StageKind::ExtractKeywords => self.extract_keywords,
            StageKind::GenerateSummary => self.generate_summary,
            StageKind::DetectLanguage => self.detect_language,
            StageKind::IndexForSearch => self.index_for_search,
        }
    }

    pub fn set_stage(&mut self, stage: StageKind, enabled: bool) {
        let flag = match stage {
            StageKind::ExtractText => &mut self.extract_text,
            StageKind::PerformOcr => &mut self.perform_ocr,
            StageKind::ExtractKeywords => &mut self.extract_keywords,
            StageKind::GenerateSummary => &mut self.generate_summary,
            StageKind::DetectLanguage => &mut self.detect_language,
            StageKind::IndexForSearch => &mut self.index_for_search,
        };
        *flag = enabled;
    }

    /// Enabled stages in execution order.
    pub fn enabled_stages(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|stage| self.is_stage_enabled(*stage))
            .collect()
    }

    /// Looks up a string value in the pass-through metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }
}

/// Accumulated stage outputs. Only stages that ran have their field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Key under which the document was written to the search index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_index: Option<String>,
}

impl ProcessingResult {
    pub fn merge(&mut self, output: StageOutput) {
        match output {
            StageOutput::ExtractedText(text) => self.extracted_text = Some(text),
            StageOutput::OcrText(text) => self.ocr_text = Some(text),
            StageOutput::Keywords(keywords) => self.keywords = Some(keywords),
            StageOutput::Summary(summary) => self.summary = Some(summary),
            StageOutput::Language(language) => self.language = Some(language),
            StageOutput::SearchIndex(key) => self.search_index = Some(key),
        }
    }

    /// Best text available so far: extracted text first, then OCR text.
    pub fn text(&self) -> Option<&str> {
        self.extracted_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.ocr_text.as_deref().filter(|t| !t.trim().is_empty()))
    }

    /// Number of stage outputs present.
    pub fn output_count(&self) -> usize {
        [
            self.extracted_text.is_some(),
            self.ocr_text.is_some(),
            self.keywords.is_some(),
            self.summary.is_some(),
            self.language.is_some(),
            self.search_index.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

/// Cause of a permanent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub message: String,
    /// Attempt number on which the job gave up.
    pub attempt: u32,
}

/// A document-processing job as tracked by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub document_id: String,
    /// Identifier of the request that triggered this job (the ingestion id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_correlation_id: Option<String>,
    pub config: JobConfig,
    pub status: JobStatus,
    pub progress: u8,
    /// Attempt currently or last executed; 0 before the first claim.
    pub attempt: u32,
    /// Set when cancellation was requested while a worker held the job.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        owner_correlation_id: Option<String>,
        config: JobConfig,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            owner_correlation_id,
            config,
            status: JobStatus::Queued,
            progress: 0,
            attempt: 0,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
