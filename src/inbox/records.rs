//! Record manager: one tracking record per file hash.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RecordError;
use crate::inbox::types::{
    Action, ActionEntry, ErrorEntry, FileRecord, FileStatus, InboxFile,
};
use crate::pipeline::stage::Stage;

/// Owns every tracking record, keyed by file hash.
///
/// All mutation goes through short write-locked sections; readers get cloned
/// snapshots so they never observe a half-applied update.
///
/// Attempt numbers come from one counter that survives `clear`, so a run
/// started before a teardown never matches a record tracked after it.
#[derive(Default)]
pub struct RecordManager {
    records: RwLock<HashMap<String, FileRecord>>,
    attempts: AtomicU32,
}

impl RecordManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `file` under `id`.
    ///
    /// Idempotent: an existing record is returned unchanged.
    pub async fn start_tracking(&self, id: &str, file: &InboxFile) -> FileRecord {
        let mut records = self.records.write().await;
        records
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(hash = %id, path = %file.path, "Tracking file");
                let mut record = FileRecord::new(id, file);
                record.attempt = self.next_attempt();
                record
            })
            .clone()
    }

    /// Put a settled record back into `queued` for a fresh run.
    pub async fn requeue(&self, id: &str) -> Result<(), RecordError> {
        let attempt = self.next_attempt();
        self.update(id, |record| {
            if !record.status.is_terminal() {
                return Err(RecordError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.status,
                    to: FileStatus::Queued,
                });
            }
            record.status = FileStatus::Queued;
            record.attempt = attempt;
            record.actions.push(ActionEntry::new(Action::Requeued, None));
            record.touch();
            Ok(())
        })
        .await?
    }

    /// Transition the record's status, appending a ledger entry.
    pub async fn set_status(&self, id: &str, status: FileStatus) -> Result<(), RecordError> {
        self.update(id, |record| {
            if !record.status.can_transition_to(status) {
                return Err(RecordError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.status,
                    to: status,
                });
            }
            record.status = status;
            record
                .actions
                .push(ActionEntry::new(Action::Status(status), Some(true)));
            record.touch();
            Ok(())
        })
        .await?
    }

    /// Append an entry to the action ledger.
    pub async fn add_action(
        &self,
        id: &str,
        action: Action,
        success: Option<bool>,
    ) -> Result<(), RecordError> {
        self.push_action(id, ActionEntry::new(action, success)).await
    }

    /// Append a ledger entry that carries a detail string.
    pub async fn add_action_detail(
        &self,
        id: &str,
        action: Action,
        detail: impl Into<String>,
    ) -> Result<(), RecordError> {
        self.push_action(id, ActionEntry::new(action, Some(true)).with_detail(detail))
            .await
    }

    /// Record that a stage was disabled by configuration.
    pub async fn skip_action(&self, id: &str, stage: Stage) -> Result<(), RecordError> {
        self.push_action(id, ActionEntry::new(Action::Skipped(stage), Some(true)))
            .await
    }

    async fn push_action(&self, id: &str, entry: ActionEntry) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.actions.push(entry);
            record.touch();
        })
        .await
    }

    /// Append an error. Status is left alone.
    pub async fn add_error(&self, id: &str, entry: ErrorEntry) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.errors.push(entry);
            record.touch();
        })
        .await
    }

    /// Most recent error recorded for `id`.
    pub async fn last_error(&self, id: &str) -> Option<ErrorEntry> {
        self.records
            .read()
            .await
            .get(id)
            .and_then(|record| record.errors.last().cloned())
    }

    pub async fn status(&self, id: &str) -> Option<FileStatus> {
        self.records.read().await.get(id).map(|record| record.status)
    }

    /// Move a queued record to `processing` and return the attempt it belongs to.
    pub async fn begin_processing(&self, id: &str) -> Result<u32, RecordError> {
        self.set_status(id, FileStatus::Processing).await?;
        self.update(id, |record| record.attempt).await
    }

    /// Whether `attempt` is still the live processing run for `id`.
    pub async fn is_processing(&self, id: &str, attempt: u32) -> bool {
        self.records
            .read()
            .await
            .get(id)
            .is_some_and(|r| r.status == FileStatus::Processing && r.attempt == attempt)
    }

    /// Set the container path carrying the processed content.
    pub async fn set_file(&self, id: &str, container: &str) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.container_path = Some(container.to_string());
            record.touch();
        })
        .await
    }

    pub async fn set_new_name(&self, id: &str, name: &str) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.new_name = Some(name.to_string());
            record.touch();
        })
        .await
    }

    pub async fn set_new_path(&self, id: &str, folder: &str) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.new_path = Some(folder.to_string());
            record.touch();
        })
        .await
    }

    pub async fn set_tags(&self, id: &str, tags: Vec<String>) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.tags = tags;
            record.touch();
        })
        .await
    }

    pub async fn set_classification(&self, id: &str, label: &str) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.classification = Some(label.to_string());
            record.touch();
        })
        .await
    }

    pub async fn set_formatted(&self, id: &str, formatted: bool) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.formatted = formatted;
            record.touch();
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Snapshot of all records, oldest first.
    pub async fn all_records(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Record counts per status; every status is present.
    pub async fn count_by_status(&self) -> BTreeMap<FileStatus, usize> {
        let mut counts: BTreeMap<FileStatus, usize> = [
            FileStatus::Queued,
            FileStatus::Processing,
            FileStatus::Completed,
            FileStatus::Error,
            FileStatus::Bypassed,
        ]
        .into_iter()
        .map(|status| (status, 0))
        .collect();

        for record in self.records.read().await.values() {
            *counts.entry(record.status).or_default() += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop every record.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn update<F, R>(&self, id: &str, f: F) -> Result<R, RecordError>
    where
        F: FnOnce(&mut FileRecord) -> R,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| RecordError::NotFound {
            id: id.to_string(),
        })?;
        Ok(f(record))
    }
}
