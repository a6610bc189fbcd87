//! Inbox facade: composes the queue, media lane, records and pipeline.
//!
//! The host constructs one [`Inbox`] with [`Inbox::initialize`] and hands
//! clones of it to whoever needs it (watcher, status API). `teardown`
//! discards all in-memory state.

pub mod id;
pub mod records;
pub mod types;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::InboxConfig;
use crate::error::{ConfigError, QueueError};
use crate::pipeline::{PipelineDeps, PipelineExecutor, PipelineOutcome};
use crate::queue::media::{Admission, MediaLane, MediaStats, SlotId};
use crate::queue::{
    QueueEvent, QueueHandler, QueueMetadata, QueueOptions, QueueStats, Settlement, TaskQueue,
};

use self::id::IdService;
use self::records::RecordManager;
use self::types::{
    Action, Analytics, ErrorEntry, ErrorKind, FileRecord, FileStatus, InboxFile,
};

/// Handle to the inbox engine. Cheap to clone.
#[derive(Clone)]
pub struct Inbox {
    core: Arc<InboxCore>,
}

struct InboxCore {
    ids: IdService,
    records: Arc<RecordManager>,
    queue: Arc<TaskQueue<InboxFile>>,
    lane: MediaLane<InboxFile>,
    executor: PipelineExecutor,
}

impl Inbox {
    /// Validate `config` and wire up the engine.
    pub fn initialize(config: InboxConfig, deps: PipelineDeps) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            concurrency = config.concurrency,
            media_concurrency = config.media_concurrency,
            timeout = ?config.task_timeout,
            "Initializing inbox"
        );

        let records = Arc::new(RecordManager::new());
        let core = Arc::new_cyclic(|weak: &Weak<InboxCore>| {
            let handler = Arc::new(InboxWorker { core: weak.clone() });
            let queue = TaskQueue::new(
                QueueOptions {
                    concurrency: config.concurrency,
                    timeout: config.task_timeout,
                },
                handler,
            );
            InboxCore {
                ids: IdService::new(),
                records: Arc::clone(&records),
                queue,
                lane: MediaLane::new(config.media_concurrency),
                executor: PipelineExecutor::new(config, records, deps),
            }
        });
        Ok(Self { core })
    }

    /// Drop all queued work and records. Runs still in flight stop at their
    /// next stage boundary.
    pub async fn teardown(&self) {
        info!("Tearing down inbox");
        self.core.queue.clear();
        self.core.lane.clear();
        self.core.records.clear().await;
    }

    /// Track and enqueue one file. Returns `false` if it is already in flight.
    pub async fn enqueue_file(&self, file: InboxFile) -> bool {
        let core = &self.core;
        let hash = core.ids.hash_file(&file);

        match core.records.status(&hash).await {
            Some(status) if status.is_in_flight() => {
                debug!(hash = %hash, path = %file.path, status = %status, "Already in flight");
                return false;
            }
            Some(_) => {
                if let Err(e) = core.records.requeue(&hash).await {
                    debug!(hash = %hash, error = %e, "Requeue lost a race");
                    return false;
                }
            }
            None => {
                core.records.start_tracking(&hash, &file).await;
            }
        }

        debug!(hash = %hash, path = %file.path, "Enqueuing file");
        core.queue.add(file, QueueMetadata::new(hash))
    }

    /// Enqueue several files; returns how many were accepted.
    ///
    /// Regular files go in ahead of media so a batch of recordings can't hold
    /// up the notes behind it.
    pub async fn enqueue_files(&self, files: impl IntoIterator<Item = InboxFile>) -> usize {
        let (media, regular): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|file| file.kind().is_media());

        let mut accepted = 0;
        for file in regular.into_iter().chain(media) {
            if self.enqueue_file(file).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Snapshot of every tracked record.
    pub async fn all_files(&self) -> Vec<FileRecord> {
        self.core.records.all_records().await
    }

    pub async fn get_file(&self, hash: &str) -> Option<FileRecord> {
        if !self.core.ids.is_valid(hash) {
            return None;
        }
        self.core.records.get(hash).await
    }

    pub async fn last_error(&self, hash: &str) -> Option<ErrorEntry> {
        if !self.core.ids.is_valid(hash) {
            return None;
        }
        self.core.records.last_error(hash).await
    }

    /// Tracking hash `file` would get.
    pub fn hash_of(&self, file: &InboxFile) -> String {
        self.core.ids.hash_file(file)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.core.queue.stats()
    }

    pub fn media_stats(&self) -> MediaStats {
        self.core.lane.stats()
    }

    pub async fn analytics(&self) -> Analytics {
        let by_status = self.core.records.count_by_status().await;
        Analytics {
            total_files: by_status.values().sum(),
            by_status,
            media_stats: self.media_stats(),
            queue_stats: self.queue_stats(),
        }
    }

    /// Nothing queued, running or parked.
    pub fn is_idle(&self) -> bool {
        self.core.queue.is_idle() && self.core.lane.stats() == MediaStats::default()
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.core.queue.subscribe()
    }
}

impl InboxCore {
    async fn process(self: Arc<Self>, file: InboxFile, metadata: QueueMetadata) -> Settlement {
        if !file.kind().is_media() {
            return settlement(self.executor.run(&file, &metadata.hash).await);
        }

        match self.lane.admit_or_defer(file.clone(), metadata.clone()) {
            Admission::Deferred => {
                debug!(hash = %metadata.hash, "Media lane full, deferring");
                Settlement::Deferred
            }
            Admission::Admitted(slot) => {
                let _slot = MediaSlot {
                    core: Arc::clone(&self),
                    slot,
                };
                settlement(self.executor.run(&file, &metadata.hash).await)
            }
        }
    }

    /// Put the next parked media item back in the primary queue.
    fn readmit_parked(&self) {
        if let Some(next) = self.lane.drain_next() {
            debug!(hash = %next.metadata.hash, "Re-admitting parked media item");
            self.queue.readmit(next.item, next.metadata);
        }
    }

    /// Record an abandonment the pipeline itself never saw.
    async fn mark_abandoned(&self, key: &str, kind: ErrorKind, message: String) {
        let entry = ErrorEntry::new(Action::Timeout, kind, message);
        if self.records.add_error(key, entry).await.is_err() {
            return;
        }
        let _ = self
            .records
            .add_action(key, Action::Timeout, Some(false))
            .await;
        match self.records.status(key).await {
            Some(status) if status.is_in_flight() => {
                if let Err(e) = self.records.set_status(key, FileStatus::Error).await {
                    warn!(hash = %key, error = %e, "Failed to mark abandoned file errored");
                }
            }
            _ => {}
        }
    }
}

/// Holds a media lane slot for one run; frees it and re-admits the next
/// parked item on drop, including when the run panics. A slot already freed
/// because the run was abandoned is left alone.
struct MediaSlot {
    core: Arc<InboxCore>,
    slot: SlotId,
}

impl Drop for MediaSlot {
    fn drop(&mut self) {
        if self.core.lane.release(self.slot) {
            self.core.readmit_parked();
        }
    }
}

fn settlement(outcome: PipelineOutcome) -> Settlement {
    match outcome {
        PipelineOutcome::Completed => Settlement::Completed,
        PipelineOutcome::Bypassed { .. } => Settlement::Bypassed,
        PipelineOutcome::Failed { stage, .. } => Settlement::Failed {
            reason: stage.failure_label().to_string(),
        },
        PipelineOutcome::Abandoned => Settlement::Failed {
            reason: "run abandoned".to_string(),
        },
    }
}

/// Queue handler that forwards to the inbox core.
struct InboxWorker {
    core: Weak<InboxCore>,
}

#[async_trait]
impl QueueHandler<InboxFile> for InboxWorker {
    async fn process(&self, item: InboxFile, metadata: QueueMetadata) -> Settlement {
        match self.core.upgrade() {
            Some(core) => core.process(item, metadata).await,
            None => Settlement::Failed {
                reason: "inbox dropped".to_string(),
            },
        }
    }

    async fn on_complete(&self, key: &str, settlement: &Settlement) {
        debug!(hash = %key, settlement = ?settlement, "Task settled");
    }

    async fn on_error(&self, error: QueueError) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let key = error.key();
        let kind = match &error {
            QueueError::Timeout { .. } => {
                warn!(hash = %key, error = %error, "Abandoning timed-out file");
                ErrorKind::Timeout
            }
            QueueError::Panicked { .. } => {
                warn!(hash = %key, error = %error, "Pipeline panicked");
                ErrorKind::Invariant
            }
            QueueError::Failed { reason, .. } => {
                debug!(hash = %key, reason = %reason, "Task failed");
                return;
            }
        };
        // The detached run may hold its media slot indefinitely.
        if core.lane.release_key(key) {
            core.readmit_parked();
        }
        core.mark_abandoned(key, kind, error.to_string()).await;
    }
}
