//! Pipeline executor: runs the stages for one file and settles the outcome.
//!
//! Flow per file:
//! 1. Mark the record `processing` and capture its attempt
//! 2. Run each stage through `execute_step` (ledger entry, then success or failure)
//! 3. On `Step::Bypass`, relocate the input to the bypass folder
//! 4. On error, relocate the input by the failed stage's recovery route
//!
//! Before every stage and every late side effect the executor checks that its
//! attempt is still the live one, so a run abandoned by the queue stops
//! without touching the vault.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::InboxConfig;
use crate::error::StageError;
use crate::inbox::records::RecordManager;
use crate::inbox::types::{Action, ErrorEntry, ErrorKind, FileStatus, InboxFile};
use crate::intelligence::{ContentIntelligence, TokenCounter};
use crate::pipeline::context::ProcessingContext;
use crate::pipeline::stage::{RecoveryRoute, STAGES, Stage};
use crate::store::FileStore;

/// What a stage decided.
#[derive(Debug)]
pub enum Step {
    /// Carry on with the updated context.
    Continue(ProcessingContext),
    /// The file doesn't qualify; stop without error.
    Bypass(String),
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Bypassed { reason: String },
    Failed { stage: Stage, invariant: bool },
    /// The run no longer owned the record (timed out or torn down).
    Abandoned,
}

/// Collaborators the stages call out to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn FileStore>,
    pub intelligence: Arc<dyn ContentIntelligence>,
    pub tokens: Arc<dyn TokenCounter>,
}

/// Runs the fixed stage sequence against one file at a time.
pub struct PipelineExecutor {
    pub(super) config: InboxConfig,
    pub(super) records: Arc<RecordManager>,
    pub(super) store: Arc<dyn FileStore>,
    pub(super) intelligence: Arc<dyn ContentIntelligence>,
    pub(super) tokens: Arc<dyn TokenCounter>,
}

impl PipelineExecutor {
    pub fn new(config: InboxConfig, records: Arc<RecordManager>, deps: PipelineDeps) -> Self {
        Self {
            config,
            records,
            store: deps.store,
            intelligence: deps.intelligence,
            tokens: deps.tokens,
        }
    }

    /// Run every stage for `file`, tracked under `hash`.
    pub async fn run(&self, file: &InboxFile, hash: &str) -> PipelineOutcome {
        let attempt = match self.records.begin_processing(hash).await {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Cannot start processing");
                return PipelineOutcome::Abandoned;
            }
        };
        info!(hash = %hash, path = %file.path, attempt, "Processing file");

        let mut ctx = ProcessingContext::new(hash, attempt, file.clone());
        for stage in STAGES {
            if !self.records.is_processing(hash, attempt).await {
                debug!(hash = %hash, stage = %stage, "Run no longer current, stopping");
                return PipelineOutcome::Abandoned;
            }

            if !stage.is_enabled(&self.config.features) {
                debug!(hash = %hash, stage = %stage, "Stage disabled, skipping");
                if let Err(e) = self.records.skip_action(hash, stage).await {
                    warn!(hash = %hash, error = %e, "Failed to record skipped stage");
                }
                continue;
            }
            if !self.applies(stage, &ctx) {
                continue;
            }

            let snapshot = ctx.clone();
            match self.execute_step(stage, ctx).await {
                Ok(Step::Continue(next)) => ctx = next,
                Ok(Step::Bypass(reason)) => return self.bypass(&snapshot, stage, reason).await,
                Err(err) => return self.recover(&snapshot, stage, err).await,
            }
        }

        info!(hash = %hash, path = %file.path, "File processed");
        PipelineOutcome::Completed
    }

    /// Stages that only run when their input is present.
    fn applies(&self, stage: Stage, ctx: &ProcessingContext) -> bool {
        match stage {
            Stage::FetchYouTube => ctx
                .content
                .as_deref()
                .and_then(super::content::youtube_video_id)
                .is_some(),
            _ => true,
        }
    }

    /// Run one stage between an "entered" and a "succeeded"/"failed" ledger entry.
    pub async fn execute_step(
        &self,
        stage: Stage,
        ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        let hash = ctx.hash.clone();
        self.records
            .add_action(&hash, Action::Stage(stage), None)
            .await?;
        debug!(hash = %hash, stage = %stage, "{}", stage.label());

        match self.run_stage(stage, ctx).await {
            Ok(Step::Continue(next)) => {
                self.records
                    .add_action(&hash, Action::Stage(stage), Some(true))
                    .await?;
                debug!(hash = %hash, stage = %stage, "Stage succeeded");
                Ok(Step::Continue(next))
            }
            Ok(bypass) => Ok(bypass),
            Err(err) if err.is_superseded() => {
                debug!(hash = %hash, stage = %stage, "Run superseded mid-stage");
                Err(err)
            }
            Err(err) => {
                let kind = if err.is_invariant() {
                    error!(hash = %hash, stage = %stage, invariant = true, error = %err, "{}", stage.failure_label());
                    ErrorKind::Invariant
                } else {
                    warn!(hash = %hash, stage = %stage, error = %err, "{}", stage.failure_label());
                    ErrorKind::Operational
                };
                let entry = ErrorEntry::new(Action::Failed(stage), kind, err.to_string())
                    .with_chain(err.chain());
                // The ledger may be gone after teardown; the stage error still wins.
                let _ = self
                    .records
                    .add_action(&hash, Action::Failed(stage), Some(false))
                    .await;
                let _ = self.records.add_error(&hash, entry).await;
                Err(err)
            }
        }
    }

    async fn run_stage(&self, stage: Stage, ctx: ProcessingContext) -> Result<Step, StageError> {
        match stage {
            Stage::Start => self.start(ctx).await,
            Stage::Validate => self.validate(ctx).await,
            Stage::Container => self.container(ctx).await,
            Stage::MoveAttachment => self.move_attachment(ctx).await,
            Stage::Extract => self.extract(ctx).await,
            Stage::Cleanup => self.cleanup(ctx).await,
            Stage::FetchYouTube => self.fetch_youtube(ctx).await,
            Stage::Classify => self.classify(ctx).await,
            Stage::RecommendFolder => self.recommend_folder(ctx).await,
            Stage::RecommendName => self.recommend_name(ctx).await,
            Stage::Format => self.format(ctx).await,
            Stage::AppendAttachment => self.append_attachment(ctx).await,
            Stage::Tag => self.tag(ctx).await,
            Stage::Complete => self.complete(ctx).await,
        }
    }

    /// Set the input aside in the bypass folder and mark the record `bypassed`.
    async fn bypass(
        &self,
        ctx: &ProcessingContext,
        stage: Stage,
        reason: String,
    ) -> PipelineOutcome {
        let hash = &ctx.hash;
        if !self.records.is_processing(hash, ctx.attempt).await {
            return PipelineOutcome::Abandoned;
        }
        info!(hash = %hash, stage = %stage, reason = %reason, "Bypassing file");

        if let Err(e) = self
            .records
            .add_action_detail(hash, Action::Bypass, reason.clone())
            .await
        {
            warn!(hash = %hash, error = %e, "Failed to record bypass");
        }

        let folder = self.config.folders.bypassed.clone();
        if let Err(e) = self.relocate(ctx, &folder).await {
            // Could not set the file aside: treat as a failure of this stage.
            let err = StageError::Store(e);
            let entry = ErrorEntry::new(Action::Failed(stage), ErrorKind::Operational, err.to_string())
                .with_chain(err.chain());
            let _ = self.records.add_error(hash, entry).await;
            return self.recover(ctx, stage, err).await;
        }

        if let Err(e) = self.records.set_status(hash, FileStatus::Bypassed).await {
            warn!(hash = %hash, error = %e, "Failed to mark file bypassed");
            return PipelineOutcome::Abandoned;
        }
        PipelineOutcome::Bypassed { reason }
    }

    /// Mark the record `error` and move the input by the last error's route.
    async fn recover(
        &self,
        ctx: &ProcessingContext,
        stage: Stage,
        err: StageError,
    ) -> PipelineOutcome {
        let hash = &ctx.hash;
        if !self.records.is_processing(hash, ctx.attempt).await {
            debug!(hash = %hash, stage = %stage, "Late failure of abandoned run ignored");
            return PipelineOutcome::Abandoned;
        }
        if let Err(e) = self.records.set_status(hash, FileStatus::Error).await {
            warn!(hash = %hash, error = %e, "Failed to mark file errored");
        }

        let route = match self.records.last_error(hash).await.map(|e| e.action) {
            Some(Action::Failed(failed)) => failed.recovery_route(),
            _ => RecoveryRoute::Errors,
        };
        let folder = route.folder(&self.config.folders).to_string();
        match self.relocate(ctx, &folder).await {
            Ok(()) => info!(
                hash = %hash,
                stage = %stage,
                folder = %folder,
                error = %err,
                "File moved after failure"
            ),
            Err(e) => error!(
                hash = %hash,
                stage = %stage,
                folder = %folder,
                error = %e,
                "Recovery failed, file left in place"
            ),
        }

        PipelineOutcome::Failed {
            stage,
            invariant: err.is_invariant(),
        }
    }

    /// Move the original input, and a container not yet placed, into `folder`.
    async fn relocate(
        &self,
        ctx: &ProcessingContext,
        folder: &str,
    ) -> Result<(), crate::error::StoreError> {
        self.store.move_to(&ctx.source_path, folder).await?;

        if let Some(container) = ctx.container_path.as_deref() {
            let unplaced = !ctx.container_is_source() && ctx.new_path.is_none();
            if unplaced && self.store.exists(container).await {
                if let Err(e) = self.store.move_to(container, folder).await {
                    warn!(hash = %ctx.hash, container = %container, error = %e, "Failed to move container");
                }
            }
        }
        Ok(())
    }
}
