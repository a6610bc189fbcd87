//! Polling watcher over the inbox folder.
//!
//! Every tick lists the folder and enqueues files the inbox has never seen.
//! A file that already has a record, whatever its status, is left alone: a
//! failed or abandoned file is only retried through an explicit
//! [`Inbox::enqueue_file`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::inbox::Inbox;
use crate::inbox::types::InboxFile;
use crate::store::FileStore;

/// Spawn a background task that rescans `folder` every `interval`.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_inbox_watcher(
    inbox: Inbox,
    store: Arc<dyn FileStore>,
    folder: String,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(folder = %folder, interval = ?interval, "Inbox watcher started");
        let mut tick = tokio::time::interval(interval);

        // first tick fires immediately
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Inbox watcher shutting down");
                return;
            }

            match scan_once(&inbox, store.as_ref(), &folder).await {
                Ok(0) => {}
                Ok(accepted) => info!(accepted, "Enqueued new inbox files"),
                Err(e) => warn!(folder = %folder, error = %e, "Inbox scan failed"),
            }
        }
    });

    (handle, shutdown_flag)
}

/// List `folder` once and enqueue its untracked files. Returns how many were accepted.
pub async fn scan_once(
    inbox: &Inbox,
    store: &dyn FileStore,
    folder: &str,
) -> Result<usize, StoreError> {
    let records = inbox.all_files().await;
    let tracked: HashSet<String> = records.iter().map(|record| record.id.clone()).collect();
    // Containers and edited inputs hash differently; skip anything still being worked on.
    let busy: HashSet<String> = records
        .into_iter()
        .filter(|record| record.status.is_in_flight())
        .flat_map(|record| std::iter::once(record.original_path).chain(record.container_path))
        .collect();

    let paths: Vec<String> = store
        .list_files(folder)
        .await?
        .into_iter()
        .filter(|p| !busy.contains(p))
        .collect();
    let metas = join_all(paths.iter().map(|path| store.metadata(path))).await;

    let mut files = Vec::with_capacity(paths.len());
    for (path, meta) in paths.into_iter().zip(metas) {
        match meta {
            Ok(meta) => {
                let file = InboxFile::with_meta(path, &meta);
                if !tracked.contains(&inbox.hash_of(&file)) {
                    files.push(file);
                }
            }
            // moved away between listing and stat
            Err(StoreError::NotFound(_)) => debug!(path = %path, "File vanished during scan"),
            Err(e) => warn!(path = %path, error = %e, "Skipping unreadable inbox file"),
        }
    }
    Ok(inbox.enqueue_files(files).await)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::config::InboxConfig;
    use crate::error::IntelligenceError;
    use crate::inbox::types::FileStatus;
    use crate::intelligence::{ApproxTokenCounter, ContentIntelligence, MediaKind, YouTubeContent};
    use crate::pipeline::PipelineDeps;
    use crate::store::LocalFileStore;

    /// Never reached: every file in these tests is bypassed at cleanup.
    struct Unused;

    #[async_trait]
    impl ContentIntelligence for Unused {
        async fn classify(&self, _: &str, _: &str, _: &[String]) -> Result<Option<String>, IntelligenceError> {
            Ok(None)
        }
        async fn recommend_folder(&self, _: &str, _: &str, _: &[String]) -> Result<Option<String>, IntelligenceError> {
            Ok(None)
        }
        async fn recommend_name(&self, _: &str, current: &str) -> Result<String, IntelligenceError> {
            Ok(current.to_string())
        }
        async fn recommend_tags(&self, _: &str, _: &str, _: &[String]) -> Result<Vec<String>, IntelligenceError> {
            Ok(Vec::new())
        }
        async fn format(&self, content: &str, _: &str) -> Result<String, IntelligenceError> {
            Ok(content.to_string())
        }
        async fn extract_from_media(&self, _: &[u8], _: MediaKind, _: &str) -> Result<String, IntelligenceError> {
            Ok(String::new())
        }
        async fn fetch_youtube(&self, _: &str) -> Result<YouTubeContent, IntelligenceError> {
            Err(IntelligenceError::InvalidResponse {
                operation: "youtube".into(),
                reason: "unused".into(),
            })
        }
    }

    async fn setup() -> (TempDir, Arc<dyn FileStore>, Inbox) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(dir.path()).unwrap());
        let deps = PipelineDeps {
            store: Arc::clone(&store),
            intelligence: Arc::new(Unused),
            tokens: Arc::new(ApproxTokenCounter),
        };
        let inbox = Inbox::initialize(InboxConfig::default(), deps).unwrap();
        (dir, store, inbox)
    }

    async fn wait_idle(inbox: &Inbox) {
        for _ in 0..400 {
            if inbox.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("inbox did not drain");
    }

    #[tokio::test]
    async fn scan_enqueues_inbox_files() {
        let (_dir, store, inbox) = setup().await;
        let folder = InboxConfig::default().folders.inbox;
        store.create(&format!("{folder}/a.md"), "hi").await.unwrap();
        store.create(&format!("{folder}/b.md"), "yo").await.unwrap();

        assert_eq!(scan_once(&inbox, store.as_ref(), &folder).await.unwrap(), 2);
        wait_idle(&inbox).await;

        let records = inbox.all_files().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == FileStatus::Bypassed));

        // bypassed files left the inbox
        assert_eq!(scan_once(&inbox, store.as_ref(), &folder).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_of_missing_folder_is_empty() {
        let (_dir, store, inbox) = setup().await;
        assert_eq!(scan_once(&inbox, store.as_ref(), "Nowhere").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn watcher_stops_on_shutdown_flag() {
        let (_dir, store, inbox) = setup().await;
        let (handle, shutdown) =
            spawn_inbox_watcher(inbox, store, "Inbox".into(), Duration::from_millis(10));

        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }
}
