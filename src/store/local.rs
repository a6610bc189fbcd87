//! Local vault on disk, backed by `tokio::fs`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{FileMeta, FileStore, join};
use crate::error::StoreError;
use crate::inbox::types::{basename, extension, file_name, parent};

/// `#tag` preceded by start-of-line or whitespace. Headings (`# Title`) don't match.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(?:^|\s)#([\p{L}\p{N}_/-]+)").unwrap());

/// Give up on finding a free name after this many suffixes.
const MAX_SUFFIX: usize = 10_000;

/// Normalize a path by resolving `.` and `..` components lexically.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// A vault rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    /// Held from picking a free name until the file is written there, so
    /// concurrent moves of same-named files never land on one path.
    names: Arc<Mutex<()>>,
}

impl LocalFileStore {
    /// Open a vault at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .map_err(|_| StoreError::NotFound(root.display().to_string()))?;
        if !root.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            names: Arc::new(Mutex::new(())),
        })
    }

    /// Resolve a vault path to an absolute path inside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.is_absolute() {
            return Err(StoreError::OutsideVault(path.to_string()));
        }
        let resolved = normalize_lexical(&self.root.join(relative));
        if !resolved.starts_with(&self.root) {
            return Err(StoreError::OutsideVault(path.to_string()));
        }
        Ok(resolved)
    }

    /// Vault path for an absolute path under the root.
    fn vault_path(&self, absolute: &Path) -> Result<String, StoreError> {
        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::OutsideVault(absolute.display().to_string()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    /// First free vault path for `desired`, suffixing ` N` before the extension.
    async fn available_path(&self, desired: &str) -> Result<String, StoreError> {
        if !self.exists(desired).await {
            return Ok(desired.to_string());
        }
        let folder = parent(desired);
        let stem = basename(desired);
        let ext = extension(desired);
        for n in 1..=MAX_SUFFIX {
            let name = if ext.is_empty() {
                format!("{stem} {n}")
            } else {
                format!("{stem} {n}.{ext}")
            };
            let candidate = join(folder, &name);
            if !self.exists(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(StoreError::InvalidPath(format!(
            "no free name for {desired}"
        )))
    }

    async fn require_file(&self, path: &str) -> Result<PathBuf, StoreError> {
        let resolved = self.resolve(path)?;
        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_file() => Ok(resolved),
            Ok(_) => Err(StoreError::InvalidPath(format!("{path} is not a file"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Every non-hidden directory under the root, as absolute paths.
    async fn walk_dirs(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut stack = vec![self.root.clone()];
        let mut dirs = Vec::new();
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    stack.push(entry.path());
                    dirs.push(entry.path());
                }
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let bytes = self.read_bytes(path).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::NotText(path.to_string()))
    }

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let resolved = self.require_file(path).await?;
        Ok(fs::read(&resolved).await?)
    }

    async fn modify(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let resolved = self.require_file(path).await?;
        fs::write(&resolved, content).await?;
        Ok(())
    }

    async fn move_to(&self, path: &str, folder: &str) -> Result<String, StoreError> {
        let source = self.require_file(path).await?;
        if parent(path) == folder.trim_matches('/') {
            return Ok(path.to_string());
        }
        self.ensure_folder(folder).await?;
        let _names = self.names.lock().await;
        let target = self.available_path(&join(folder, file_name(path))).await?;
        fs::rename(&source, self.resolve(&target)?).await?;
        debug!(from = %path, to = %target, "Moved file");
        Ok(target)
    }

    async fn copy_to(&self, path: &str, folder: &str) -> Result<String, StoreError> {
        let source = self.require_file(path).await?;
        self.ensure_folder(folder).await?;
        let _names = self.names.lock().await;
        let target = self.available_path(&join(folder, file_name(path))).await?;
        fs::copy(&source, self.resolve(&target)?).await?;
        debug!(from = %path, to = %target, "Copied file");
        Ok(target)
    }

    async fn rename(&self, path: &str, new_base_name: &str) -> Result<String, StoreError> {
        let source = self.require_file(path).await?;
        if new_base_name.is_empty() || new_base_name.contains('/') {
            return Err(StoreError::InvalidPath(new_base_name.to_string()));
        }
        let ext = extension(path);
        let name = if ext.is_empty() {
            new_base_name.to_string()
        } else {
            format!("{new_base_name}.{ext}")
        };
        let desired = join(parent(path), &name);
        if desired == path {
            return Ok(desired);
        }
        let _names = self.names.lock().await;
        let target = self.available_path(&desired).await?;
        fs::rename(&source, self.resolve(&target)?).await?;
        debug!(from = %path, to = %target, "Renamed file");
        Ok(target)
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.resolve(folder)?).await?;
        Ok(())
    }

    async fn create(&self, path: &str, content: &str) -> Result<String, StoreError> {
        self.ensure_folder(parent(path)).await?;
        let _names = self.names.lock().await;
        let target = self.available_path(path).await?;
        fs::write(self.resolve(&target)?, content).await?;
        Ok(target)
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => fs::try_exists(resolved).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn metadata(&self, path: &str) -> Result<FileMeta, StoreError> {
        let resolved = self.require_file(path).await?;
        let meta = fs::metadata(&resolved).await?;
        Ok(FileMeta {
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn list_files(&self, folder: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.resolve(folder)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(join(folder, &name));
            }
        }
        files.sort();
        Ok(files)
    }

    async fn list_folders(&self) -> Result<Vec<String>, StoreError> {
        let mut folders = self
            .walk_dirs()
            .await?
            .iter()
            .map(|dir| self.vault_path(dir))
            .collect::<Result<Vec<_>, _>>()?;
        folders.sort();
        Ok(folders)
    }

    async fn all_tags(&self) -> Result<Vec<String>, StoreError> {
        let mut dirs = self.walk_dirs().await?;
        dirs.push(self.root.clone());

        let mut counts: HashMap<String, usize> = HashMap::new();
        for dir in dirs {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                // Unreadable or binary notes don't contribute tags.
                let Ok(content) = fs::read_to_string(&path).await else {
                    continue;
                };
                for cap in TAG_RE.captures_iter(&content) {
                    *counts.entry(cap[1].to_string()).or_default() += 1;
                }
            }
        }

        let mut tags: Vec<(String, usize)> = counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(tags.into_iter().map(|(tag, _)| tag).collect())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn vault() -> (TempDir, LocalFileStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn normalize_resolves_parent_dirs() {
        assert_eq!(
            normalize_lexical(Path::new("/vault/a/../b/./c")),
            PathBuf::from("/vault/b/c")
        );
    }

    #[tokio::test]
    async fn rejects_escape() {
        let (_dir, store) = vault();
        let err = store.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::OutsideVault(_)));
        assert!(!store.exists("../../x").await);
    }

    #[tokio::test]
    async fn create_suffixes_on_collision() {
        let (_dir, store) = vault();
        let first = store.create("Notes/idea.md", "one").await.unwrap();
        let second = store.create("Notes/idea.md", "two").await.unwrap();
        let third = store.create("Notes/idea.md", "three").await.unwrap();

        assert_eq!(first, "Notes/idea.md");
        assert_eq!(second, "Notes/idea 1.md");
        assert_eq!(third, "Notes/idea 2.md");
        assert_eq!(store.read("Notes/idea 1.md").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn move_copy_rename() {
        let (_dir, store) = vault();
        store.create("Inbox/a.md", "alpha").await.unwrap();
        store.create("Archive/a.md", "existing").await.unwrap();

        let moved = store.move_to("Inbox/a.md", "Archive").await.unwrap();
        assert_eq!(moved, "Archive/a 1.md");
        assert!(!store.exists("Inbox/a.md").await);

        let copy = store.copy_to(&moved, "Backups").await.unwrap();
        assert_eq!(copy, "Backups/a 1.md");
        assert_eq!(store.read(&copy).await.unwrap(), "alpha");

        let renamed = store.rename(&moved, "Alpha Notes").await.unwrap();
        assert_eq!(renamed, "Archive/Alpha Notes.md");
        assert_eq!(store.rename(&renamed, "Alpha Notes").await.unwrap(), renamed);
    }

    #[tokio::test]
    async fn concurrent_moves_of_same_name_never_overwrite() {
        let (_dir, store) = vault();
        store.create("X/a.md", "from x").await.unwrap();
        store.create("Y/a.md", "from y").await.unwrap();

        let (x, y) = tokio::join!(store.move_to("X/a.md", "Notes"), store.move_to("Y/a.md", "Notes"));
        let (x, y) = (x.unwrap(), y.unwrap());
        assert_ne!(x, y);

        let mut contents = vec![store.read(&x).await.unwrap(), store.read(&y).await.unwrap()];
        contents.sort();
        assert_eq!(contents, vec!["from x", "from y"]);
        assert_eq!(store.list_files("Notes").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_names() {
        let (_dir, store) = vault();
        let results = futures::future::join_all(
            (0..5).map(|i| {
                let store = store.clone();
                async move { store.create("Notes/idea.md", &format!("v{i}")).await }
            }),
        )
        .await;

        let mut paths: Vec<String> = results.into_iter().map(Result::unwrap).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 5);
    }

    #[tokio::test]
    async fn move_into_same_folder_is_noop() {
        let (_dir, store) = vault();
        store.create("Notes/a.md", "x").await.unwrap();
        assert_eq!(store.move_to("Notes/a.md", "Notes").await.unwrap(), "Notes/a.md");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, store) = vault();
        let err = store.modify("nope.md", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_files_and_folders() {
        let (_dir, store) = vault();
        store.create("Inbox/b.md", "").await.unwrap();
        store.create("Inbox/a.png", "").await.unwrap();
        store.create("Inbox/Sub/c.md", "").await.unwrap();
        store.create(".obsidian/config", "").await.unwrap();

        assert_eq!(
            store.list_files("Inbox").await.unwrap(),
            vec!["Inbox/a.png".to_string(), "Inbox/b.md".to_string()]
        );
        assert!(store.list_files("Missing").await.unwrap().is_empty());
        assert_eq!(
            store.list_folders().await.unwrap(),
            vec!["Inbox".to_string(), "Inbox/Sub".to_string()]
        );
    }

    #[tokio::test]
    async fn all_tags_by_frequency() {
        let (_dir, store) = vault();
        store
            .create("a.md", "# Heading\nSome #rust and #tokio\n#rust again")
            .await
            .unwrap();
        store.create("Notes/b.md", "#rust #notes/daily").await.unwrap();
        store.create("Notes/c.txt", "#ignored").await.unwrap();

        let tags = store.all_tags().await.unwrap();
        assert_eq!(tags[0], "rust");
        assert!(tags.contains(&"tokio".to_string()));
        assert!(tags.contains(&"notes/daily".to_string()));
        assert!(!tags.contains(&"ignored".to_string()));
        assert!(!tags.iter().any(|t| t == "Heading"));
    }

    #[tokio::test]
    async fn metadata_reports_size() {
        let (_dir, store) = vault();
        store.create("a.md", "12345").await.unwrap();
        let meta = store.metadata("a.md").await.unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.modified.is_some());
    }
}
