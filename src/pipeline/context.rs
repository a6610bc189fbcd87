//! Per-file processing context, passed by value from stage to stage.

use serde::Serialize;

use crate::error::StageError;
use crate::inbox::types::{FileKind, InboxFile};

/// Document type chosen by classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub document_type: String,
    /// 0-100.
    pub confidence: u8,
}

/// What the pipeline has learned about one file so far.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub hash: String,
    /// Processing attempt this run belongs to.
    pub attempt: u32,
    pub inbox_file: InboxFile,
    pub kind: FileKind,
    /// Where the original input currently lives. Follows it through moves.
    pub source_path: String,
    /// Markdown file carrying the processed content.
    pub container_path: Option<String>,
    /// Relocated media input.
    pub attachment_path: Option<String>,
    pub content: Option<String>,
    pub classification: Option<Classification>,
    pub new_path: Option<String>,
    pub new_name: Option<String>,
    pub tags: Vec<String>,
    pub formatted_content: Option<String>,
}

impl ProcessingContext {
    pub fn new(hash: impl Into<String>, attempt: u32, file: InboxFile) -> Self {
        Self {
            hash: hash.into(),
            attempt,
            kind: file.kind(),
            source_path: file.path.clone(),
            inbox_file: file,
            container_path: None,
            attachment_path: None,
            content: None,
            classification: None,
            new_path: None,
            new_name: None,
            tags: Vec::new(),
            formatted_content: None,
        }
    }

    /// Content, which must be present and non-empty at this point.
    pub fn require_content(&self) -> Result<&str, StageError> {
        match self.content.as_deref() {
            Some(content) if !content.is_empty() => Ok(content),
            _ => Err(StageError::Invariant(
                "content must be available at this stage".into(),
            )),
        }
    }

    /// Container path, which must exist at this point.
    pub fn require_container(&self) -> Result<&str, StageError> {
        self.container_path
            .as_deref()
            .ok_or_else(|| StageError::Invariant("container must exist at this stage".into()))
    }

    /// Whether the container is the input itself (plain-text files).
    pub fn container_is_source(&self) -> bool {
        self.container_path.as_deref() == Some(self.source_path.as_str())
    }
}
