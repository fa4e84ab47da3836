// src/store/mod.rs
// Typed interface over a versioned blob store. Memory files, reminder and
// conversation blobs, and reflection documents all live behind this trait.

mod fs;
mod memory;

pub use self::fs::FsObjectStore;
pub use self::memory::MemoryObjectStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stored object with its current content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
    pub content: String,
    /// RFC3339
    pub updated_at: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// A listing row. Non-recursive listings include synthetic directory rows
/// whose path ends with '/'.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub path: String,
    pub size: usize,
    /// RFC3339; empty for synthetic directory rows
    pub updated_at: String,
}

impl ObjectEntry {
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// One retained version of an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub version_id: String,
    /// RFC3339
    pub timestamp: String,
    pub size: usize,
}

/// Receipt for a completed write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub version_id: Option<String>,
}

/// Versioned blob store boundary. Implementations must keep
/// `size == content.len()` and rewrite objects atomically.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<StoredObject>>;

    async fn write(&self, path: &str, content: &str) -> Result<WriteReceipt>;

    /// List objects under `prefix`. When `recursive` is false, collapse
    /// deeper paths into one synthetic `{prefix}{segment}/` row each.
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectEntry>>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Newest-first versions. May be empty when the backend does not
    /// version.
    async fn versions(&self, path: &str, limit: usize) -> Result<Vec<ObjectVersion>>;

    async fn read_version(&self, path: &str, version_id: &str) -> Result<Option<String>>;
}

/// Collapse a flat path listing into direct children of `prefix`:
/// files stay as-is, deeper paths become one directory row per first-level
/// segment. Shared by backends.
pub(crate) fn collapse_to_direct_children(
    prefix: &str,
    entries: Vec<ObjectEntry>,
) -> Vec<ObjectEntry> {
    let mut out: Vec<ObjectEntry> = Vec::new();
    let mut seen_dirs = std::collections::BTreeSet::new();

    for entry in entries {
        let Some(remainder) = entry.path.strip_prefix(prefix) else {
            continue;
        };
        match remainder.split_once('/') {
            Some((segment, _)) => {
                let dir_path = format!("{prefix}{segment}/");
                if seen_dirs.insert(dir_path.clone()) {
                    out.push(ObjectEntry {
                        path: dir_path,
                        size: 0,
                        updated_at: String::new(),
                    });
                }
            }
            None => out.push(entry),
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

/// Validate an object key: non-empty, relative, no traversal components.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(crate::error::EngramError::InvalidInput(
            "path must not be empty".into(),
        ));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(crate::error::EngramError::InvalidInput(format!(
            "path must be a relative file key: {path}"
        )));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(crate::error::EngramError::InvalidInput(format!(
            "path contains invalid segment: {path}"
        )));
    }
    Ok(())
}
