// src/store/memory.rs
// In-memory versioned object store. Backs tests and ephemeral deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    ObjectEntry, ObjectStore, ObjectVersion, StoredObject, WriteReceipt,
    collapse_to_direct_children, validate_path,
};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Version {
    version_id: String,
    content: String,
    /// RFC3339
    timestamp: String,
}

#[derive(Debug, Default, Clone)]
struct Entry {
    /// Newest first; the head is the current content.
    versions: Vec<Version>,
}

/// BTreeMap keeps listings in key order for free.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn read(&self, path: &str) -> Result<Option<StoredObject>> {
        validate_path(path)?;
        let objects = self.objects.read().await;
        Ok(objects.get(path).and_then(|entry| {
            entry.versions.first().map(|v| StoredObject {
                path: path.to_string(),
                content: v.content.clone(),
                updated_at: v.timestamp.clone(),
                size: v.content.len(),
                version_id: Some(v.version_id.clone()),
            })
        }))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteReceipt> {
        validate_path(path)?;
        let version = Version {
            version_id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let version_id = version.version_id.clone();

        let mut objects = self.objects.write().await;
        objects.entry(path.to_string()).or_default().versions.insert(0, version);
        Ok(WriteReceipt {
            version_id: Some(version_id),
        })
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectEntry>> {
        let objects = self.objects.read().await;
        let entries: Vec<ObjectEntry> = objects
            .iter()
            .filter(|(path, entry)| path.starts_with(prefix) && !entry.versions.is_empty())
            .map(|(path, entry)| {
                let head = &entry.versions[0];
                ObjectEntry {
                    path: path.clone(),
                    size: head.content.len(),
                    updated_at: head.timestamp.clone(),
                }
            })
            .collect();

        if recursive {
            Ok(entries)
        } else {
            Ok(collapse_to_direct_children(prefix, entries))
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut objects = self.objects.write().await;
        objects.remove(path);
        Ok(())
    }

    async fn versions(&self, path: &str, limit: usize) -> Result<Vec<ObjectVersion>> {
        validate_path(path)?;
        let objects = self.objects.read().await;
        Ok(objects
            .get(path)
            .map(|entry| {
                entry
                    .versions
                    .iter()
                    .take(limit)
                    .map(|v| ObjectVersion {
                        version_id: v.version_id.clone(),
                        timestamp: v.timestamp.clone(),
                        size: v.content.len(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_version(&self, path: &str, version_id: &str) -> Result<Option<String>> {
        validate_path(path)?;
        let objects = self.objects.read().await;
        Ok(objects.get(path).and_then(|entry| {
            entry
                .versions
                .iter()
                .find(|v| v.version_id == version_id)
                .map(|v| v.content.clone())
        }))
    }
}
