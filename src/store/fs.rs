// src/store/fs.rs
// Filesystem-backed versioned object store.
//
// Layout under the root directory:
//   objects/{path}                     current content
//   versions/{path}/{millis}_{uuid}    retained versions, newest = highest millis
//
// Writes land in a temp file and are renamed into place, so a crashed write
// never leaves a torn object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::{
    ObjectEntry, ObjectStore, ObjectVersion, StoredObject, WriteReceipt,
    collapse_to_direct_children, validate_path,
};
use crate::error::{EngramError, Result};

pub struct FsObjectStore {
    objects_root: PathBuf,
    versions_root: PathBuf,
}

impl FsObjectStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let objects_root = root.join("objects");
        let versions_root = root.join("versions");
        fs::create_dir_all(&objects_root).await?;
        fs::create_dir_all(&versions_root).await?;
        Ok(Self {
            objects_root,
            versions_root,
        })
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.objects_root.join(path))
    }

    fn version_dir(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.versions_root.join(path))
    }

    /// Newest-first (millis, version_id, size) triples for a path.
    async fn version_files(&self, path: &str) -> Result<Vec<(i64, String, usize)>> {
        let dir = self.version_dir(path)?;
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((millis, version_id)) = name.split_once('_') else {
                continue;
            };
            let Ok(millis) = millis.parse::<i64>() else {
                continue;
            };
            let size = entry.metadata().await.map(|m| m.len() as usize).unwrap_or(0);
            out.push((millis, version_id.to_string(), size));
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn read(&self, path: &str) -> Result<Option<StoredObject>> {
        let file = self.object_path(path)?;
        let content = match fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let updated_at = file_mtime_rfc3339(&file).await;
        let version_id = self
            .version_files(path)
            .await?
            .first()
            .map(|(_, id, _)| id.clone());
        Ok(Some(StoredObject {
            path: path.to_string(),
            size: content.len(),
            content,
            updated_at,
            version_id,
        }))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteReceipt> {
        let file = self.object_path(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Retain this write as a version before it becomes current.
        let version_id = uuid::Uuid::new_v4().to_string();
        let version_dir = self.version_dir(path)?;
        fs::create_dir_all(&version_dir).await?;
        let millis = Utc::now().timestamp_millis();
        fs::write(version_dir.join(format!("{millis:013}_{version_id}")), content).await?;

        // Atomic replace of the current object.
        let tmp = file.with_extension(format!("tmp-{version_id}"));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &file).await?;

        Ok(WriteReceipt {
            version_id: Some(version_id),
        })
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        collect_files(&self.objects_root, &self.objects_root, &mut entries)?;
        entries.retain(|e| e.path.starts_with(prefix));
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        if recursive {
            Ok(entries)
        } else {
            Ok(collapse_to_direct_children(prefix, entries))
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.object_path(path)?;
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngramError::Io(e)),
        }
    }

    async fn versions(&self, path: &str, limit: usize) -> Result<Vec<ObjectVersion>> {
        Ok(self
            .version_files(path)
            .await?
            .into_iter()
            .take(limit)
            .map(|(millis, version_id, size)| ObjectVersion {
                version_id,
                timestamp: DateTime::<Utc>::from_timestamp_millis(millis)
                    .unwrap_or_default()
                    .to_rfc3339(),
                size,
            })
            .collect())
    }

    async fn read_version(&self, path: &str, version_id: &str) -> Result<Option<String>> {
        for (millis, id, _) in self.version_files(path).await? {
            if id == version_id {
                let file = self.version_dir(path)?.join(format!("{millis:013}_{id}"));
                return Ok(Some(fs::read_to_string(&file).await?));
            }
        }
        Ok(None)
    }
}

async fn file_mtime_rfc3339(path: &Path) -> String {
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(mtime) => DateTime::<Utc>::from(mtime).to_rfc3339(),
        Err(_) => Utc::now().to_rfc3339(),
    }
}

/// Walk the objects tree collecting file rows keyed by store path.
/// Synchronous recursion; object trees here are small.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<ObjectEntry>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            // Skip in-flight temp files from interrupted writes.
            if path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy().starts_with("tmp-"))
            {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(|e| EngramError::Store(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let metadata = entry.metadata()?;
            let updated_at = metadata
                .modified()
                .map(|m| DateTime::<Utc>::from(m).to_rfc3339())
                .unwrap_or_default();
            out.push(ObjectEntry {
                path: relative,
                size: metadata.len() as usize,
                updated_at,
            });
        }
    }
    Ok(())
}
