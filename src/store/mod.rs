//! File store: the vault the engine reads from and writes to.
//!
//! Paths are vault-relative and `/`-separated. Every write that could collide
//! with an existing file picks a free name by suffixing ` 1`, ` 2`, ... before
//! the extension instead of overwriting.

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

pub use local::LocalFileStore;

/// Size and modification time of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Capability set the pipeline needs from the vault.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a text file.
    async fn read(&self, path: &str) -> Result<String, StoreError>;

    /// Read raw bytes (media inputs).
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Overwrite an existing file's content.
    async fn modify(&self, path: &str, content: &str) -> Result<(), StoreError>;

    /// Move a file into `folder`, returning its new path.
    async fn move_to(&self, path: &str, folder: &str) -> Result<String, StoreError>;

    /// Copy a file into `folder`, returning the copy's path.
    async fn copy_to(&self, path: &str, folder: &str) -> Result<String, StoreError>;

    /// Rename a file in place, keeping its extension. Returns the new path.
    async fn rename(&self, path: &str, new_base_name: &str) -> Result<String, StoreError>;

    /// Create `folder` and its parents if missing.
    async fn ensure_folder(&self, folder: &str) -> Result<(), StoreError>;

    /// Create a file at `path` (or the next free name), returning the path used.
    async fn create(&self, path: &str, content: &str) -> Result<String, StoreError>;

    async fn exists(&self, path: &str) -> bool;

    async fn metadata(&self, path: &str) -> Result<FileMeta, StoreError>;

    /// Files directly inside `folder`, sorted.
    async fn list_files(&self, folder: &str) -> Result<Vec<String>, StoreError>;

    /// Every folder in the vault, sorted. Hidden folders are skipped.
    async fn list_folders(&self) -> Result<Vec<String>, StoreError>;

    /// Tags used across markdown files, most frequent first, without `#`.
    async fn all_tags(&self) -> Result<Vec<String>, StoreError>;
}

/// Join a folder and a name into a vault path.
pub fn join(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}
