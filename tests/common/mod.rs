//! Shared fixtures for the inbox integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use inbox_engine::config::InboxConfig;
use inbox_engine::error::IntelligenceError;
use inbox_engine::inbox::Inbox;
use inbox_engine::inbox::types::{FileRecord, InboxFile};
use inbox_engine::intelligence::{
    ApproxTokenCounter, ContentIntelligence, MediaKind, YouTubeContent,
};
use inbox_engine::pipeline::PipelineDeps;
use inbox_engine::store::{FileStore, LocalFileStore};

/// Maximum time a test waits for the inbox to drain.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks how many calls are inside a section at once.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scripted content-intelligence fake.
///
/// Every answer is configurable; `delay` is applied to folder recommendation
/// and media extraction, which is where the tests need work to overlap. The
/// `fail_*` switches turn an operation into a server error, and `no_folder`
/// makes folder recommendation come back empty.
pub struct ScriptedIntelligence {
    pub delay: Duration,
    pub label: Option<String>,
    pub folder: String,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub formatted: String,
    pub extracted: String,
    pub video: YouTubeContent,
    pub fail_folder: AtomicBool,
    pub fail_classify: AtomicBool,
    pub fail_tags: AtomicBool,
    pub no_folder: AtomicBool,
    /// Operation names in call order, e.g. `recommend_folder`.
    pub calls: Mutex<Vec<String>>,
    /// Content each folder recommendation was asked about.
    pub folder_inputs: Mutex<Vec<String>>,
    pub extraction: Gauge,
}

impl Default for ScriptedIntelligence {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            label: None,
            folder: "Notes".into(),
            name: None,
            tags: Vec::new(),
            formatted: "formatted body".into(),
            extracted: "Text extracted from media".into(),
            video: YouTubeContent {
                title: "Rust in Production".into(),
                transcript: "hello from the talk".into(),
            },
            fail_folder: AtomicBool::new(false),
            fail_classify: AtomicBool::new(false),
            fail_tags: AtomicBool::new(false),
            no_folder: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            folder_inputs: Mutex::new(Vec::new()),
            extraction: Gauge::default(),
        }
    }
}

impl ScriptedIntelligence {
    fn log(&self, operation: &str) {
        self.calls.lock().unwrap().push(operation.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| *c == operation).count()
    }
}

fn scripted_failure(operation: &str) -> IntelligenceError {
    IntelligenceError::Status {
        operation: operation.into(),
        status: 500,
        body: "scripted failure".into(),
    }
}

#[async_trait]
impl ContentIntelligence for ScriptedIntelligence {
    async fn classify(
        &self,
        _content: &str,
        _file_name: &str,
        candidate_types: &[String],
    ) -> Result<Option<String>, IntelligenceError> {
        self.log("classify");
        if self.fail_classify.load(Ordering::SeqCst) {
            return Err(scripted_failure("classify"));
        }
        Ok(self
            .label
            .clone()
            .filter(|label| candidate_types.contains(label)))
    }

    async fn recommend_folder(
        &self,
        content: &str,
        _file_name: &str,
        _candidate_folders: &[String],
    ) -> Result<Option<String>, IntelligenceError> {
        self.log("recommend_folder");
        self.folder_inputs.lock().unwrap().push(content.to_string());
        tokio::time::sleep(self.delay).await;
        if self.fail_folder.load(Ordering::SeqCst) {
            return Err(scripted_failure("folders"));
        }
        if self.no_folder.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.folder.clone()))
    }

    async fn recommend_name(
        &self,
        _content: &str,
        current_name: &str,
    ) -> Result<String, IntelligenceError> {
        self.log("recommend_name");
        Ok(self.name.clone().unwrap_or_else(|| current_name.to_string()))
    }

    async fn recommend_tags(
        &self,
        _content: &str,
        _file_name: &str,
        _existing_tags: &[String],
    ) -> Result<Vec<String>, IntelligenceError> {
        self.log("recommend_tags");
        if self.fail_tags.load(Ordering::SeqCst) {
            return Err(scripted_failure("tags"));
        }
        Ok(self.tags.clone())
    }

    async fn format(&self, _content: &str, _instructions: &str) -> Result<String, IntelligenceError> {
        self.log("format");
        Ok(self.formatted.clone())
    }

    async fn extract_from_media(
        &self,
        _bytes: &[u8],
        _kind: MediaKind,
        _extension: &str,
    ) -> Result<String, IntelligenceError> {
        self.log("extract_from_media");
        self.extraction.enter();
        tokio::time::sleep(self.delay).await;
        self.extraction.exit();
        Ok(self.extracted.clone())
    }

    async fn fetch_youtube(&self, video_id: &str) -> Result<YouTubeContent, IntelligenceError> {
        self.log(&format!("fetch_youtube:{video_id}"));
        Ok(self.video.clone())
    }
}

/// A temp vault, its store, the fake and an initialized inbox.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<dyn FileStore>,
    pub ai: Arc<ScriptedIntelligence>,
    pub inbox: Inbox,
    pub config: InboxConfig,
}

impl Harness {
    pub fn new(config: InboxConfig, ai: ScriptedIntelligence) -> Self {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(dir.path()).unwrap());
        let ai = Arc::new(ai);
        let deps = PipelineDeps {
            store: Arc::clone(&store),
            intelligence: ai.clone(),
            tokens: Arc::new(ApproxTokenCounter),
        };
        let inbox = Inbox::initialize(config.clone(), deps).unwrap();
        Self {
            dir,
            store,
            ai,
            inbox,
            config,
        }
    }

    /// Write `content` to `<inbox>/<name>` and describe it like the watcher would.
    pub async fn drop_file(&self, name: &str, content: &str) -> InboxFile {
        let path = format!("{}/{name}", self.config.folders.inbox);
        let path = self.store.create(&path, content).await.unwrap();
        let meta = self.store.metadata(&path).await.unwrap();
        InboxFile::with_meta(path, &meta)
    }

    /// Drop and enqueue a file, returning its tracking hash.
    pub async fn enqueue(&self, name: &str, content: &str) -> String {
        let file = self.drop_file(name, content).await;
        let hash = self.inbox.hash_of(&file);
        assert!(self.inbox.enqueue_file(file).await, "{name} was not accepted");
        hash
    }

    pub async fn record(&self, hash: &str) -> FileRecord {
        self.inbox.get_file(hash).await.expect("record is tracked")
    }

    pub async fn read(&self, path: &str) -> String {
        self.store.read(path).await.unwrap()
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.store.exists(path).await
    }

    /// Wait until the inbox has nothing queued, running or parked.
    pub async fn drain(&self) {
        tokio::time::timeout(DRAIN_TIMEOUT, async {
            while !self.inbox.is_idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("inbox did not drain: {:?}", self.inbox.queue_stats()));
    }
}

/// Default config with every optional stage switched on.
pub fn all_stages() -> InboxConfig {
    let mut config = InboxConfig::default();
    config.features.enable_document_classification = true;
    config.features.enable_file_renaming = true;
    config.features.use_similar_tags = true;
    config
}
