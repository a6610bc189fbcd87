//! Pipeline stages, their fixed order and how their failures are recovered.

use serde::{Deserialize, Serialize};

use crate::config::{FeatureFlags, FolderLayout};

/// One named step of the per-file pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Validate,
    Container,
    MoveAttachment,
    Extract,
    Cleanup,
    FetchYouTube,
    Classify,
    RecommendFolder,
    RecommendName,
    Format,
    AppendAttachment,
    Tag,
    Complete,
}

/// Execution order. No stage is ever reordered or run twice for one file.
pub const STAGES: [Stage; 14] = [
    Stage::Start,
    Stage::Validate,
    Stage::Container,
    Stage::MoveAttachment,
    Stage::Extract,
    Stage::Cleanup,
    Stage::FetchYouTube,
    Stage::Classify,
    Stage::RecommendFolder,
    Stage::RecommendName,
    Stage::Format,
    Stage::AppendAttachment,
    Stage::Tag,
    Stage::Complete,
];

/// Where the original input goes after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryRoute {
    /// Generic error folder.
    Errors,
    /// Backup folder: content is fine, only enrichment failed.
    Backups,
}

impl RecoveryRoute {
    pub fn folder<'a>(&self, folders: &'a FolderLayout) -> &'a str {
        match self {
            Self::Errors => &folders.errors,
            Self::Backups => &folders.backups,
        }
    }
}

impl Stage {
    /// Progress label shown while the stage runs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "Starting processing...",
            Self::Validate => "Validating document...",
            Self::Container => "Creating document container...",
            Self::MoveAttachment => "Moving attachments...",
            Self::Extract => "Extracting content...",
            Self::Cleanup => "Cleaning up file...",
            Self::FetchYouTube => "Fetching YouTube transcript...",
            Self::Classify => "Analyzing document type...",
            Self::RecommendFolder => "Moving to final location...",
            Self::RecommendName => "Generating file name...",
            Self::Format => "Formatting content...",
            Self::AppendAttachment => "Appending content...",
            Self::Tag => "Generating tags...",
            Self::Complete => "Processing completed",
        }
    }

    pub fn failure_label(&self) -> &'static str {
        match self {
            Self::Start => "Failed to start processing",
            Self::Validate => "Failed to validate document",
            Self::Container => "Failed to create container",
            Self::MoveAttachment => "Failed to move attachments",
            Self::Extract => "Failed to extract content",
            Self::Cleanup => "Failed to clean up file",
            Self::FetchYouTube => "Failed to fetch YouTube transcript",
            Self::Classify => "Failed to analyze document type",
            Self::RecommendFolder => "Failed to move file",
            Self::RecommendName => "Failed to rename file",
            Self::Format => "Failed to format content",
            Self::AppendAttachment => "Failed to append content",
            Self::Tag => "Failed to generate tags",
            Self::Complete => "Processing failed",
        }
    }

    /// Whether configuration leaves this stage switched on.
    pub fn is_enabled(&self, features: &FeatureFlags) -> bool {
        match self {
            Self::Classify | Self::Format => features.enable_document_classification,
            Self::RecommendName => features.enable_file_renaming,
            Self::Tag => features.use_similar_tags,
            _ => true,
        }
    }

    /// Recovery destination when this stage fails.
    pub fn recovery_route(&self) -> RecoveryRoute {
        match self {
            Self::Classify | Self::Tag | Self::FetchYouTube => RecoveryRoute::Backups,
            Self::Container | Self::MoveAttachment | Self::RecommendFolder => RecoveryRoute::Errors,
            _ => RecoveryRoute::Errors,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Validate => "validate",
            Self::Container => "container",
            Self::MoveAttachment => "move_attachment",
            Self::Extract => "extract",
            Self::Cleanup => "cleanup",
            Self::FetchYouTube => "fetch_you_tube",
            Self::Classify => "classify",
            Self::RecommendFolder => "recommend_folder",
            Self::RecommendName => "recommend_name",
            Self::Format => "format",
            Self::AppendAttachment => "append_attachment",
            Self::Tag => "tag",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}
