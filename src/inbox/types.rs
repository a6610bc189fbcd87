//! Tracking records and the per-file audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::stage::Stage;
use crate::queue::QueueStats;
use crate::queue::media::MediaStats;
use crate::store::FileMeta;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

// ── Input files ─────────────────────────────────────────────────────

/// What kind of input a file is, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Text,
    Image,
    Audio,
    Pdf,
    Unsupported,
}

impl FileKind {
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.to_ascii_lowercase();
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Self::Text
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Audio
        } else if ext == "pdf" {
            Self::Pdf
        } else {
            Self::Unsupported
        }
    }

    /// Media inputs get a markdown container and go through the media lane.
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::Audio | Self::Pdf)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// A file dropped into the inbox, addressed by its vault-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxFile {
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl InboxFile {
    /// A file known only by path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified: None,
        }
    }

    /// A file with size and modification time from the store.
    pub fn with_meta(path: impl Into<String>, meta: &FileMeta) -> Self {
        Self {
            path: path.into(),
            size: meta.size,
            modified: meta.modified,
        }
    }

    /// Last path component, extension included.
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    /// File name without extension.
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }

    pub fn extension(&self) -> &str {
        extension(&self.path)
    }

    /// Parent folder, empty for the vault root.
    pub fn parent(&self) -> &str {
        parent(&self.path)
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_extension(self.extension())
    }
}

/// Last component of a vault path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Last component without its extension.
pub fn basename(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Extension without the dot, empty when there is none.
pub fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx + 1..],
    }
}

/// Parent folder of a vault path, empty for the root.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Waiting for a queue slot (or parked in the media lane).
    Queued,
    /// Pipeline is running.
    Processing,
    /// All stages succeeded.
    Completed,
    /// A stage failed or the task was abandoned.
    Error,
    /// The file did not qualify and was set aside.
    Bypassed,
}

impl FileStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// Terminal statuses only leave through an explicit requeue.
    pub fn can_transition_to(&self, target: FileStatus) -> bool {
        use FileStatus::*;

        matches!(
            (self, target),
            (Queued, Processing)
                | (Queued, Error)
                | (Processing, Completed)
                | (Processing, Error)
                | (Processing, Bypassed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Bypassed)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Bypassed => "bypassed",
        };
        write!(f, "{s}")
    }
}

// ── Ledger ──────────────────────────────────────────────────────────

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum Action {
    /// A stage was entered (`success` absent) or completed (`success = true`).
    Stage(Stage),
    /// A stage raised an error.
    Failed(Stage),
    /// A stage was disabled by configuration.
    Skipped(Stage),
    /// The pipeline stopped early because the file did not qualify.
    Bypass,
    /// The queue gave up waiting on the task.
    Timeout,
    /// A settled record was enqueued again.
    Requeued,
    /// Status change.
    Status(FileStatus),
}

impl Action {
    /// Human-readable label for logs and status views.
    pub fn label(&self) -> String {
        match self {
            Self::Stage(stage) => stage.label().to_string(),
            Self::Failed(stage) => stage.failure_label().to_string(),
            Self::Skipped(stage) => format!("Skipped: {}", stage.label()),
            Self::Bypass => "Bypassed".to_string(),
            Self::Timeout => "Processing timed out".to_string(),
            Self::Requeued => "Queued again".to_string(),
            Self::Status(status) => format!("Status: {status}"),
        }
    }
}

/// One entry in a file's append-only action ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: Uuid,
    pub action: Action,
    /// `None` = entered, `Some(true)` = completed, `Some(false)` = failed.
    pub success: Option<bool>,
    /// Free-form detail, e.g. a bypass reason.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionEntry {
    pub fn new(action: Action, success: Option<bool>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            success,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// How an error should be read by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Expected runtime failure: I/O, network, service error.
    Operational,
    /// Integration or programming defect.
    Invariant,
    /// Abandoned by the queue; real outcome unknown.
    Timeout,
}

/// An error recorded against a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub action: Action,
    pub kind: ErrorKind,
    pub message: String,
    /// Source chain of the underlying error, if any.
    pub chain: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(action: Action, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            action,
            kind,
            message: message.into(),
            chain: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_chain(mut self, chain: Option<String>) -> Self {
        self.chain = chain;
        self
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// Tracking record for one input file, keyed by its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub display_name: String,
    pub original_path: String,
    pub status: FileStatus,
    /// Fresh on every track and requeue; a pipeline run only acts on its own attempt.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Markdown file carrying the processed content.
    pub container_path: Option<String>,
    /// Destination folder chosen for the container.
    pub new_path: Option<String>,
    pub new_name: Option<String>,
    pub classification: Option<String>,
    pub formatted: bool,
    pub tags: Vec<String>,
    pub actions: Vec<ActionEntry>,
    pub errors: Vec<ErrorEntry>,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, file: &InboxFile) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: file.basename().to_string(),
            original_path: file.path.clone(),
            status: FileStatus::Queued,
            attempt: 1,
            created_at: now,
            updated_at: now,
            container_path: None,
            new_path: None,
            new_name: None,
            classification: None,
            formatted: false,
            tags: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether the ledger holds an entry for `action`.
    pub fn has_action(&self, action: Action) -> bool {
        self.actions.iter().any(|entry| entry.action == action)
    }
}

// ── Analytics ───────────────────────────────────────────────────────

/// Aggregate view over all tracked files.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub by_status: BTreeMap<FileStatus, usize>,
    pub total_files: usize,
    pub media_stats: MediaStats,
    pub queue_stats: QueueStats,
}

impl Analytics {
    /// Number of records in `status`.
    pub fn count(&self, status: FileStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Records that reached a terminal status.
    pub fn settled(&self) -> usize {
        self.count(FileStatus::Completed) + self.count(FileStatus::Error) + self.count(FileStatus::Bypassed)
    }
}
