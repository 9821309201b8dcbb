//! Directory-backed object store.
//!
//! Objects live at `<root>/<bucket>/<key>`, with `/` in keys mapped to
//! subdirectories. Writes land in a temporary file next to the target and
//! are renamed into place, so readers never observe a half-written object.

use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{key_segments, ObjectStore, StorageError};

/// An [`ObjectStore`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    bucket: String,
    bucket_dir: PathBuf,
}

impl DirObjectStore {
    /// Open (creating if needed) the bucket directory `<root>/<bucket>`.
    pub fn new(root: &Path, bucket: impl Into<String>) -> Result<Self, StorageError> {
        let bucket = bucket.into();
        key_segments(&bucket)?;
        let bucket_dir = root.join(&bucket);
        std::fs::create_dir_all(&bucket_dir).map_err(|source| StorageError::Io {
            path: bucket_dir.clone(),
            source,
        })?;
        log::debug!("Object store bucket at {}", bucket_dir.display());
        Ok(Self { bucket, bucket_dir })
    }

    /// Filesystem location of `key`.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.bucket_dir.clone();
        for segment in key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_object(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            }),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| StorageError::Unreachable(format!("write task failed: {}", e)))?
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        Ok(format!("file://{}?expires={}", path.display(), expires))
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(parent).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(body).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
