//! File-based blob storage for native platforms.

use super::{BlobRef, BlobStore, BoxFuture, StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores blobs as files under a base directory. URLs use the `file://` scheme.
pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    /// Create a blob store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Blob store in the default location.
    ///
    /// On Unix: `~/.local/share/scrapbook/blobs/`
    /// On Windows: `%LOCALAPPDATA%\scrapbook\blobs\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("scrapbook").join("blobs"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a blob path onto the filesystem. Each segment is sanitized and
    /// `.`/`..` segments are dropped so blobs stay under the base directory.
    fn blob_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .map(|segment| {
                segment
                    .chars()
                    .map(|c| {
                        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .fold(self.base_path.clone(), |acc, segment| acc.join(segment))
    }
}

impl BlobStore for FileBlobStore {
    fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>> {
        let target = self.blob_path(path);
        let path = path.to_string();
        Box::pin(async move {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Io(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
            fs::write(&target, bytes).map_err(|e| {
                StorageError::Io(format!("Failed to write {}: {}", target.display(), e))
            })?;
            Ok(BlobRef { path })
        })
    }

    fn public_url(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<String>> {
        let target = self.blob_path(&blob.path);
        let path = blob.path.clone();
        Box::pin(async move {
            if !target.exists() {
                return Err(StorageError::NotFound(path));
            }
            Ok(format!("file://{}", target.display()))
        })
    }
}
