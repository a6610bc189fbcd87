//! Per-file processing pipeline.
//!
//! Every file runs the same fixed stage sequence:
//! Start → Validate → Container → MoveAttachment → Extract → Cleanup →
//! FetchYouTube → Classify → RecommendFolder → RecommendName → Format →
//! AppendAttachment → Tag → Complete.
//!
//! A stage either continues with an updated [`ProcessingContext`], bypasses
//! (the file doesn't qualify, not an error), or fails. The first bypass or
//! failure stops the run.

pub mod content;
pub mod context;
pub mod executor;
pub mod stage;
mod stages;

pub use context::{Classification, ProcessingContext};
pub use executor::{PipelineDeps, PipelineExecutor, PipelineOutcome, Step};
pub use stage::{RecoveryRoute, STAGES, Stage};
