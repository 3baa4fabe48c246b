use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;
use crate::stages::{Stage, StageInput, StageKind, StageOutput};

/// What gets written to the search index for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub document_id: String,
    pub job_id: String,
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Destination of the index stage. Returns the key the document is stored
/// under.
pub trait SearchIndex: Send + Sync {
    fn index(&self, document: IndexDocument) -> Result<String, StageError>;
}

/// Search index kept in memory, keyed by document id. Re-indexing a document
/// replaces the previous entry.
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<String, IndexDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, document_id: &str) -> Option<IndexDocument> {
        self.read().get(document_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of documents whose text or keywords contain `term`, ignoring case.
    pub fn search(&self, term: &str) -> Vec<String> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<String> = self
            .read()
            .values()
            .filter(|doc| {
                doc.text.to_lowercase().contains(&needle)
                    || doc.keywords.iter().any(|k| k.contains(&needle))
            })
            .map(|doc| doc.document_id.clone())
            .collect();
        hits.sort();
        hits
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, IndexDocument>> {
        match self.documents.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SearchIndex for MemorySearchIndex {
    fn index(&self, document: IndexDocument) -> Result<String, StageError> {
        if document.document_id.trim().is_empty() {
            return Err(StageError::Index("document id is empty".to_string()));
        }
        let key = document.document_id.clone();
        let mut documents = match self.documents.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        documents.insert(key.clone(), document);
        Ok(key)
    }
}

pub struct SearchIndexStage {
    index: Arc<dyn SearchIndex>,
}

impl SearchIndexStage {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

impl Stage for SearchIndexStage {
    fn kind(&self) -> StageKind {
        StageKind::IndexForSearch
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let document = IndexDocument {
            document_id: input.document_id.clone(),
            job_id: input.job_id.clone(),
            text: input.text_or_metadata(),
            keywords: input.intermediate.keywords.clone().unwrap_or_default(),
            summary: input.intermediate.summary.clone(),
            language: input.intermediate.language.clone(),
            metadata: input.metadata.clone(),
        };
        let key = self.index.index(document)?;
        Ok(StageOutput::SearchIndex(key))
    }
}
