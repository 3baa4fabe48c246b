//! Access to the raw bytes of uploaded documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::StageError;

/// Fetches a document's content by its external id.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, document_id: &str) -> Result<Vec<u8>, StageError>;
}

/// Reads documents from `<root>/<document_id>`.
pub struct FsDocumentLoader {
    root: PathBuf,
}

impl FsDocumentLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Document ids are single path components; anything that could escape
    /// the root is rejected before touching the filesystem.
    fn resolve(&self, document_id: &str) -> Result<PathBuf, StageError> {
        let trimmed = document_id.trim();
        if trimmed.is_empty()
            || trimmed == "."
            || trimmed == ".."
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.contains('\0')
            || Path::new(trimmed).is_absolute()
        {
            return Err(StageError::InvalidDocumentId(document_id.to_string()));
        }
        Ok(self.root.join(trimmed))
    }
}

impl DocumentLoader for FsDocumentLoader {
    fn load(&self, document_id: &str) -> Result<Vec<u8>, StageError> {
        let path = self.resolve(document_id)?;
        std::fs::read(&path).map_err(|e| StageError::DocumentUnavailable {
            document_id: document_id.to_string(),
            source: e,
        })
    }
}

/// In-process document source, used by embedders and tests.
#[derive(Default)]
pub struct MemoryDocumentLoader {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        let mut documents = match self.documents.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        documents.insert(document_id.into(), content.into());
    }

    pub fn with_document(self, document_id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(document_id, content);
        self
    }
}

impl DocumentLoader for MemoryDocumentLoader {
    fn load(&self, document_id: &str) -> Result<Vec<u8>, StageError> {
        let documents = match self.documents.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| StageError::DocumentUnavailable {
                document_id: document_id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such document"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fs_loader_reads_document() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("doc-1.txt"), b"hello").unwrap();

        let loader = FsDocumentLoader::new(temp_dir.path());
        assert_eq!(loader.load("doc-1.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_fs_loader_missing_document() {
        let temp_dir = TempDir::new().unwrap();
        let loader = FsDocumentLoader::new(temp_dir.path());

        match loader.load("absent") {
            Err(StageError::DocumentUnavailable { document_id, .. }) => {
                assert_eq!(document_id, "absent")
            }
            other => panic!("Expected DocumentUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_fs_loader_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let loader = FsDocumentLoader::new(temp_dir.path().join("docs"));

        for id in ["", "..", "../secret", "a/b", "a\\b", "/etc/passwd"] {
            assert!(
                matches!(loader.load(id), Err(StageError::InvalidDocumentId(_))),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryDocumentLoader::new().with_document("a", "alpha");
        assert_eq!(loader.load("a").unwrap(), b"alpha");
        assert!(loader.load("b").is_err());
    }
}
