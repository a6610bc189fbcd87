//! Error types for the inbox engine.

use std::time::Duration;

use crate::inbox::types::FileStatus;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("Content intelligence error: {0}")]
    Intelligence(#[from] IntelligenceError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by the file-store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path escapes vault: {0}")]
    OutsideVault(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File is not valid UTF-8 text: {0}")]
    NotText(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the content-intelligence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum IntelligenceError {
    #[error("{operation} request failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),
}

/// Record manager errors.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("No record tracked for {id}")]
    NotFound { id: String },

    #[error("Record {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: String,
        from: FileStatus,
        to: FileStatus,
    },
}

/// Errors surfaced by the task queue to its `on_error` hook.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Task {key} abandoned after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    #[error("Task {key} failed: {reason}")]
    Failed { key: String, reason: String },

    #[error("Task {key} panicked: {reason}")]
    Panicked { key: String, reason: String },
}

impl QueueError {
    /// Key of the task this error belongs to.
    pub fn key(&self) -> &str {
        match self {
            Self::Timeout { key, .. } | Self::Failed { key, .. } | Self::Panicked { key, .. } => {
                key
            }
        }
    }
}

/// Failure of a single pipeline stage.
///
/// `Invariant` marks an integration or programming defect (a missing context
/// field, an empty required result). It is routed through the same recovery
/// path as the operational variants but logged at error level.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Intelligence(#[from] IntelligenceError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// The run lost its record mid-stage (timed out or torn down).
    #[error("Run superseded")]
    Superseded,
}

impl StageError {
    /// Whether this failure signals a defect rather than a runtime condition.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// Render the full source chain, outermost first.
    pub fn chain(&self) -> Option<String> {
        let mut source = std::error::Error::source(self);
        let mut parts = Vec::new();
        while let Some(err) = source {
            parts.push(err.to_string());
            source = err.source();
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(": "))
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
