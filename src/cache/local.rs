//! Cache-aside materialization of remote book files.

use dashmap::DashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use super::entry::{owner_dir, FileReference};
use super::{CacheStats, CacheUsage};
use crate::error::{Error, Result};
use crate::index::OwnerId;
use crate::storage::ObjectStore;

/// Local disk cache in front of an [`ObjectStore`].
///
/// Concurrent [`materialize`](Self::materialize) calls for the same cache
/// path are serialized: the first fetches, the rest wait and then find the
/// file present. Fetched bodies are written to a temporary file in the
/// destination directory and renamed into place, so the canonical path only
/// ever holds complete files.
pub struct LocalFileCache {
    root: PathBuf,
    store: Arc<dyn ObjectStore>,
    in_flight: DashMap<PathBuf, Arc<AsyncMutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    bytes_fetched: AtomicU64,
}

impl std::fmt::Debug for LocalFileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileCache")
            .field("root", &self.root)
            .field("bucket", &self.store.bucket())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl LocalFileCache {
    /// Create a cache rooted at `root`, creating the directory if absent.
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        log::debug!("Local file cache at {}", root.display());
        Ok(Self {
            root,
            store,
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
        })
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `owner`/`remote_key` is (or would be) cached.
    pub fn local_path(&self, owner: &OwnerId, remote_key: &str) -> Result<PathBuf> {
        FileReference::new(owner.clone(), remote_key).local_path(&self.root)
    }

    /// Return a local path holding the bytes of `remote_key`, fetching the
    /// object only if no cached copy exists.
    ///
    /// A present file is trusted as-is; it is never re-validated against
    /// the remote object.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidReference`] if the key has no usable file name
    /// * [`Error::StorageUnavailable`] if the store is unreachable or the
    ///   object is missing
    /// * [`Error::Io`] if the cached copy cannot be written
    pub async fn materialize(&self, owner: &OwnerId, remote_key: &str) -> Result<PathBuf> {
        let path = self.local_path(owner, remote_key)?;

        if is_present(&path).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache hit: {}", path.display());
            return Ok(path);
        }

        let lock = self
            .in_flight
            .entry(path.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            match is_present(&path).await {
                Ok(true) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache filled by concurrent fetch: {}", path.display());
                    Ok(path.clone())
                }
                Ok(false) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.fetch_into(remote_key, &path).await.map(|()| path.clone())
                }
                Err(e) => Err(e),
            }
        };

        drop(lock);
        self.in_flight
            .remove_if(&path, |_, entry| Arc::strong_count(entry) == 1);

        result
    }

    /// Materialize `remote_key` and read its full contents.
    pub async fn read(&self, owner: &OwnerId, remote_key: &str) -> Result<Vec<u8>> {
        let path = self.materialize(owner, remote_key).await?;
        tokio::fs::read(&path).await.map_err(|e| Error::io(&path, e))
    }

    /// Remove cached files of `owner`, or every cached file when `owner` is
    /// `None`. The cache root itself is kept. Remote objects are untouched.
    pub async fn evict(&self, owner: Option<&OwnerId>) -> Result<()> {
        match owner {
            Some(owner) => {
                let dir = owner_dir(&self.root, owner);
                remove_dir_if_exists(&dir).await?;
                log::info!("Evicted cache for owner {}", owner);
            }
            None => {
                let mut entries = match tokio::fs::read_dir(&self.root).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tokio::fs::create_dir_all(&self.root)
                            .await
                            .map_err(|e| Error::io(&self.root, e))?;
                        return Ok(());
                    }
                    Err(e) => return Err(Error::io(&self.root, e)),
                };
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| Error::io(&self.root, e))?
                {
                    let path = entry.path();
                    let file_type = entry.file_type().await.map_err(|e| Error::io(&path, e))?;
                    if file_type.is_dir() {
                        remove_dir_if_exists(&path).await?;
                    } else {
                        remove_file_if_exists(&path).await?;
                    }
                }
                log::info!("Evicted entire cache at {}", self.root.display());
            }
        }
        Ok(())
    }

    /// Disk usage of the owner subtree, or of the whole cache.
    pub async fn usage(&self, owner: Option<&OwnerId>) -> Result<CacheUsage> {
        let dir = match owner {
            Some(owner) => owner_dir(&self.root, owner),
            None => self.root.clone(),
        };
        tokio::task::spawn_blocking(move || CacheUsage::scan(&dir))
            .await
            .map_err(|e| {
                Error::io(
                    PathBuf::new(),
                    std::io::Error::other(format!("usage scan failed: {}", e)),
                )
            })?
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }

    async fn fetch_into(&self, remote_key: &str, path: &Path) -> Result<()> {
        log::info!(
            "Cache miss, fetching {}/{}",
            self.store.bucket(),
            remote_key
        );
        let body = self
            .store
            .get_object(remote_key)
            .await
            .map_err(|e| Error::storage(remote_key, e))?;
        let len = body.len() as u64;

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&target, &body))
            .await
            .map_err(|e| {
                Error::io(
                    path,
                    std::io::Error::other(format!("cache write task failed: {}", e)),
                )
            })??;

        self.bytes_fetched.fetch_add(len, Ordering::Relaxed);
        log::debug!("Cached {} bytes at {}", len, path.display());
        Ok(())
    }
}

async fn is_present(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::io(path, e))
}

/// Write `body` next to `path` and rename it into place.
///
/// The temporary file is deleted on every error path.
fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidReference(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".fetch-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| Error::io(parent, e))?;
    tmp.write_all(body).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(dir, e)),
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}
