//! Stage bodies. Each takes the context by value and returns a [`Step`].

use tracing::{debug, info};

use super::content::{
    original_content, sanitize, sanitize_file_name, sanitize_tag, strip_front_matter,
    truncate_chars, youtube_section, youtube_video_id,
};
use super::context::{Classification, ProcessingContext};
use super::executor::{PipelineExecutor, Step};
use crate::error::{StageError, StoreError};
use crate::inbox::types::{FileStatus, basename, extension, file_name, parent};
use crate::intelligence::MediaKind;
use crate::store::join;

/// Confidence given to a label returned by the classifier.
const CLASSIFIED_CONFIDENCE: u8 = 100;

impl PipelineExecutor {
    pub(super) async fn start(&self, ctx: ProcessingContext) -> Result<Step, StageError> {
        debug!(hash = %ctx.hash, kind = ?ctx.kind, "Pipeline started");
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn validate(&self, ctx: ProcessingContext) -> Result<Step, StageError> {
        if !ctx.kind.is_supported() {
            return Ok(Step::Bypass("Unsupported file type".into()));
        }
        if !self.store.exists(&ctx.source_path).await {
            return Err(StageError::Validation(format!(
                "{} no longer exists",
                ctx.source_path
            )));
        }
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn container(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let container = if ctx.kind.is_media() {
            let desired = join(
                parent(&ctx.source_path),
                &format!("{}.md", basename(&ctx.source_path)),
            );
            self.store.create(&desired, "").await?
        } else {
            ctx.source_path.clone()
        };
        self.records.set_file(&ctx.hash, &container).await?;
        ctx.container_path = Some(container);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn move_attachment(
        &self,
        mut ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        if ctx.kind.is_media() {
            let moved = self
                .store
                .move_to(&ctx.source_path, &self.config.folders.attachments)
                .await?;
            ctx.attachment_path = Some(moved.clone());
            ctx.source_path = moved;
        }
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn extract(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let content = match MediaKind::from_file_kind(ctx.kind) {
            Some(kind) => {
                let bytes = self.store.read_bytes(&ctx.source_path).await?;
                let text = self
                    .intelligence
                    .extract_from_media(&bytes, kind, extension(&ctx.source_path))
                    .await?;
                self.ensure_current(&ctx).await?;
                self.store.modify(ctx.require_container()?, &text).await?;
                text
            }
            None => self.store.read(&ctx.source_path).await?,
        };
        ctx.content = Some(content);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn cleanup(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let raw = ctx.content.take().unwrap_or_default();
        if raw.is_empty() {
            return Ok(Step::Bypass("No content available".into()));
        }

        let sanitized = sanitize(&raw);
        let min = self.config.min_content_chars;
        if strip_front_matter(&sanitized).chars().count() < min {
            return Ok(Step::Bypass(format!(
                "Content too short (less than {min} characters)"
            )));
        }

        if sanitized != raw {
            self.store.modify(ctx.require_container()?, &sanitized).await?;
        }
        ctx.content = Some(sanitized);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn fetch_youtube(
        &self,
        mut ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        let container = ctx.require_container()?.to_string();
        let content = ctx.require_content()?;
        let video_id = youtube_video_id(content)
            .ok_or_else(|| StageError::Invariant("no YouTube link in content".into()))?
            .to_string();

        let video = self.intelligence.fetch_youtube(&video_id).await?;
        self.ensure_current(&ctx).await?;
        let updated = format!("{content}{}", youtube_section(&video.title, &video.transcript));
        self.store.modify(&container, &updated).await?;
        info!(hash = %ctx.hash, video_id = %video_id, "Appended YouTube transcript");

        ctx.content = Some(updated);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn classify(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let container = ctx.require_container()?.to_string();
        let content = ctx.require_content()?;

        let candidates = self.template_names().await?;
        if candidates.is_empty() {
            debug!(hash = %ctx.hash, "No templates, nothing to classify against");
            return Ok(Step::Continue(ctx));
        }

        let excerpt = truncate_chars(original_content(content), self.config.content_cutoff_chars);
        let label = self
            .intelligence
            .classify(excerpt, file_name(&container), &candidates)
            .await?;
        self.ensure_current(&ctx).await?;
        let Some(label) = label else {
            debug!(hash = %ctx.hash, "No document type returned");
            return Ok(Step::Continue(ctx));
        };

        if let Some(tag) = sanitize_tag(&label) {
            self.append(&container, &format!("\n\n{tag}")).await?;
        }
        self.records.set_classification(&ctx.hash, &label).await?;
        info!(hash = %ctx.hash, document_type = %label, "Classified");
        ctx.classification = Some(Classification {
            document_type: label,
            confidence: CLASSIFIED_CONFIDENCE,
        });
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn recommend_folder(
        &self,
        mut ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        let content = ctx.require_content()?;
        let container = ctx.require_container()?.to_string();

        let candidates: Vec<String> = self
            .store
            .list_folders()
            .await?
            .into_iter()
            .filter(|f| !self.config.folders.is_system_folder(f))
            .collect();

        let excerpt = truncate_chars(original_content(content), self.config.content_cutoff_chars);
        let folder = self
            .intelligence
            .recommend_folder(excerpt, ctx.inbox_file.basename(), &candidates)
            .await?
            .map(|f| f.trim_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| {
                StageError::Invariant("folder recommendation must return a valid path".into())
            })?;
        self.ensure_current(&ctx).await?;

        let moved = self.store.move_to(&container, &folder).await?;
        if ctx.container_is_source() {
            ctx.source_path = moved.clone();
        }
        self.records.set_new_path(&ctx.hash, &folder).await?;
        self.records.set_file(&ctx.hash, &moved).await?;
        info!(hash = %ctx.hash, folder = %folder, "Moved to recommended folder");

        ctx.container_path = Some(moved);
        ctx.new_path = Some(folder);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn recommend_name(
        &self,
        mut ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        let content = ctx.require_content()?;
        let container = ctx.require_container()?.to_string();
        let current = basename(&container).to_string();

        let excerpt = truncate_chars(original_content(content), self.config.content_cutoff_chars);
        let suggested = self.intelligence.recommend_name(excerpt, &current).await?;
        self.ensure_current(&ctx).await?;
        let Some(name) = sanitize_file_name(&suggested) else {
            debug!(hash = %ctx.hash, suggested = %suggested, "Unusable name suggestion");
            return Ok(Step::Continue(ctx));
        };
        if name == current {
            return Ok(Step::Continue(ctx));
        }

        let renamed = self.store.rename(&container, &name).await?;
        if ctx.container_is_source() {
            ctx.source_path = renamed.clone();
        }
        self.records.set_new_name(&ctx.hash, &name).await?;
        self.records.set_file(&ctx.hash, &renamed).await?;
        info!(hash = %ctx.hash, name = %name, "Renamed");

        ctx.container_path = Some(renamed);
        ctx.new_name = Some(name);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn format(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let Some(classification) = ctx.classification.clone() else {
            debug!(hash = %ctx.hash, "No classification, not formatting");
            return Ok(Step::Continue(ctx));
        };
        if classification.confidence < self.config.format_confidence_threshold {
            debug!(hash = %ctx.hash, confidence = classification.confidence, "Confidence too low to format");
            return Ok(Step::Continue(ctx));
        }
        let content = ctx.require_content()?.to_string();
        let tokens = self.tokens.count_tokens(&content);
        if tokens > self.config.max_formatting_tokens {
            debug!(hash = %ctx.hash, tokens, max = self.config.max_formatting_tokens, "Content too large to format");
            return Ok(Step::Continue(ctx));
        }

        let template = join(
            &self.config.folders.templates,
            &format!("{}.md", classification.document_type),
        );
        let instructions = match self.store.read(&template).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(StoreError::NotFound(_)) => {
                debug!(hash = %ctx.hash, template = %template, "No formatting instructions");
                return Ok(Step::Continue(ctx));
            }
            Err(e) => return Err(e.into()),
        };

        let container = ctx.require_container()?.to_string();
        let backup = self
            .store
            .copy_to(&container, &self.config.folders.backups)
            .await?;
        let formatted = self.intelligence.format(&content, &instructions).await?;
        self.ensure_current(&ctx).await?;
        let body = format!("{formatted}\n\n---\n[[{backup} | Link to original file]]");
        self.store.modify(&container, &body).await?;
        self.records.set_formatted(&ctx.hash, true).await?;
        info!(hash = %ctx.hash, backup = %backup, "Formatted");

        ctx.formatted_content = Some(formatted);
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn append_attachment(
        &self,
        ctx: ProcessingContext,
    ) -> Result<Step, StageError> {
        if let (Some(attachment), Some(container)) = (&ctx.attachment_path, &ctx.container_path) {
            self.append(container, &format!("\n\n![[{attachment}]]"))
                .await?;
        }
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn tag(&self, mut ctx: ProcessingContext) -> Result<Step, StageError> {
        let container = ctx.require_container()?.to_string();
        let content = ctx.require_content()?;

        let existing = self.store.all_tags().await?;
        let excerpt = truncate_chars(content, self.config.content_cutoff_chars);
        let suggested = self
            .intelligence
            .recommend_tags(excerpt, &container, &existing)
            .await?;
        self.ensure_current(&ctx).await?;

        let current = self.store.read(&container).await?;
        let mut tags: Vec<String> = Vec::new();
        for tag in suggested.iter().filter_map(|t| sanitize_tag(t)) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let new: Vec<&str> = tags
            .iter()
            .map(String::as_str)
            .filter(|t| !current.split_whitespace().any(|w| w == *t))
            .collect();
        if !new.is_empty() {
            let updated = format!("{current}\n\n{}", new.join(" "));
            self.store.modify(&container, &updated).await?;
        }

        self.records.set_tags(&ctx.hash, tags.clone()).await?;
        debug!(hash = %ctx.hash, count = tags.len(), "Tagged");
        ctx.tags = tags;
        Ok(Step::Continue(ctx))
    }

    pub(super) async fn complete(&self, ctx: ProcessingContext) -> Result<Step, StageError> {
        self.records
            .set_status(&ctx.hash, FileStatus::Completed)
            .await?;
        Ok(Step::Continue(ctx))
    }

    /// Basenames of the markdown templates.
    async fn template_names(&self) -> Result<Vec<String>, StageError> {
        Ok(self
            .store
            .list_files(&self.config.folders.templates)
            .await?
            .iter()
            .filter(|path| extension(path) == "md")
            .map(|path| basename(path).to_string())
            .collect())
    }

    /// Fail with `Superseded` if the run lost its record while waiting.
    async fn ensure_current(&self, ctx: &ProcessingContext) -> Result<(), StageError> {
        if self.records.is_processing(&ctx.hash, ctx.attempt).await {
            Ok(())
        } else {
            Err(StageError::Superseded)
        }
    }

    async fn append(&self, path: &str, text: &str) -> Result<(), StageError> {
        let current = self.store.read(path).await?;
        self.store.modify(path, &format!("{current}{text}")).await?;
        Ok(())
    }
}
