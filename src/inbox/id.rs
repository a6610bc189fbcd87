//! Stable identifiers for inbox files.

use sha2::{Digest, Sha256};

use super::types::InboxFile;

/// Derives the tracking hash for a file.
///
/// The hash covers the path, size and modification time, so the same file
/// enqueued twice maps to one record while a file rewritten in place gets a
/// fresh one.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdService;

impl IdService {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase hex SHA-256 of `path | size | modified`.
    pub fn hash_file(&self, file: &InboxFile) -> String {
        let modified = file
            .modified
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(file.path.as_bytes());
        hasher.update(b"|");
        hasher.update(file.size.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(modified.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `id` has the shape of a hash produced by [`hash_file`](Self::hash_file).
    pub fn is_valid(&self, id: &str) -> bool {
        id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}
