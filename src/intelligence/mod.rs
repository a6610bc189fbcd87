//! Content intelligence: classification, suggestions, formatting and extraction.
//!
//! The pipeline only sees the [`ContentIntelligence`] and [`TokenCounter`]
//! traits. [`RemoteIntelligence`] talks to the organizer server over HTTP.

pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IntelligenceError;
use crate::inbox::types::FileKind;

pub use remote::RemoteIntelligence;

/// Media inputs that need extraction before they have text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Pdf,
}

impl MediaKind {
    pub fn from_file_kind(kind: FileKind) -> Option<Self> {
        match kind {
            FileKind::Image => Some(Self::Image),
            FileKind::Audio => Some(Self::Audio),
            FileKind::Pdf => Some(Self::Pdf),
            FileKind::Text | FileKind::Unsupported => None,
        }
    }
}

/// Title and transcript of a YouTube video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YouTubeContent {
    pub title: String,
    pub transcript: String,
}

/// AI-backed operations used by the pipeline stages.
///
/// Failures are always errors, never sentinel values. An empty label or a
/// missing folder is a valid answer and is returned as `None`.
#[async_trait]
pub trait ContentIntelligence: Send + Sync {
    /// Pick a document type from `candidate_types`, or `None`.
    async fn classify(
        &self,
        content: &str,
        file_name: &str,
        candidate_types: &[String],
    ) -> Result<Option<String>, IntelligenceError>;

    /// Suggest a destination folder; may be a folder not in `candidate_folders`.
    async fn recommend_folder(
        &self,
        content: &str,
        file_name: &str,
        candidate_folders: &[String],
    ) -> Result<Option<String>, IntelligenceError>;

    /// Suggest a file name (without extension).
    async fn recommend_name(
        &self,
        content: &str,
        current_name: &str,
    ) -> Result<String, IntelligenceError>;

    /// Suggest tags, existing or new, without `#`.
    async fn recommend_tags(
        &self,
        content: &str,
        file_name: &str,
        existing_tags: &[String],
    ) -> Result<Vec<String>, IntelligenceError>;

    /// Rewrite `content` following `instructions`.
    async fn format(&self, content: &str, instructions: &str) -> Result<String, IntelligenceError>;

    /// Text from an image (OCR), audio (transcription) or pdf.
    async fn extract_from_media(
        &self,
        bytes: &[u8],
        kind: MediaKind,
        extension: &str,
    ) -> Result<String, IntelligenceError>;

    /// Title and transcript for a YouTube video id.
    async fn fetch_youtube(&self, video_id: &str) -> Result<YouTubeContent, IntelligenceError>;
}

/// Token estimate used to gate formatting.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Roughly four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}
