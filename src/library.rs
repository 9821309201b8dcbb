//! Library facade.
//!
//! [`Library`] wires a hasher, a metadata index, an object store and a local
//! cache together and exposes the operations the rest of an application
//! needs: hash, upload with deduplication, materialize for reading, evict,
//! and digest backfill. Components are passed in explicitly, so tests swap
//! in [`MemoryObjectStore`](crate::storage::MemoryObjectStore) and
//! [`MemoryFileIndex`](crate::index::MemoryFileIndex).
//!
//! # Example
//!
//! ```no_run
//! use shelfcache::config::Config;
//! use shelfcache::index::OwnerId;
//! use shelfcache::library::Library;
//! use std::path::Path;
//!
//! # async fn run() -> shelfcache::error::Result<()> {
//! let library = Library::open(&Config::default())?;
//! let owner = OwnerId::new("42")?;
//! let record = library.upload(&owner, Path::new("Dune.epub")).await?;
//! let local = library.materialize(&owner, &record.remote_key).await?;
//! println!("{}", local.display());
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, CacheUsage, LocalFileCache};
use crate::config::Config;
use crate::content::{ContentDigest, ContentHasher};
use crate::dedup::{object_key, BackfillConfig, BackfillReport, DedupGate};
use crate::error::{Error, Result};
use crate::index::{FileId, FileIndex, FileRecord, IndexError, OwnerId, SqliteFileIndex};
use crate::storage::{DirObjectStore, ObjectStore};

/// Entry point for hashing, uploading and reading book files.
pub struct Library {
    gate: DedupGate,
    key_prefix: String,
    signed_url_ttl: Duration,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("gate", &self.gate)
            .field("key_prefix", &self.key_prefix)
            .field("signed_url_ttl", &self.signed_url_ttl)
            .finish()
    }
}

impl Library {
    /// Open the library described by `config`: a directory-backed object
    /// store, the SQLite index and the local cache.
    ///
    /// # Errors
    ///
    /// Fails if a directory cannot be created, the index cannot be opened,
    /// or the index is pinned to a different digest algorithm.
    pub fn open(config: &Config) -> Result<Self> {
        let store = DirObjectStore::new(&config.object_root, config.bucket.clone())
            .map_err(|e| Error::storage(config.bucket.clone(), e))?;
        if let Some(parent) = config.index_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let index = SqliteFileIndex::open(&config.index_path, config.digest_algorithm)?;
        let hasher =
            ContentHasher::new(config.digest_algorithm).with_buffer_size(config.hash_buffer_size);

        log::debug!(
            "Opened library: index {}, objects {}, cache {}",
            config.index_path.display(),
            config.object_root.display(),
            config.cache_root.display()
        );
        Ok(Self::from_parts(
            hasher,
            Arc::new(index),
            Arc::new(store),
            &config.cache_root,
        )?
        .with_key_prefix(config.key_prefix.clone())
        .with_signed_url_ttl(config.signed_url_ttl()))
    }

    /// Build a library from explicit components. The cache lives under
    /// `cache_root` and reads through `store`.
    pub fn from_parts(
        hasher: ContentHasher,
        index: Arc<dyn FileIndex>,
        store: Arc<dyn ObjectStore>,
        cache_root: &Path,
    ) -> Result<Self> {
        let cache = Arc::new(LocalFileCache::new(cache_root, store.clone())?);
        let defaults = Config::default();
        let signed_url_ttl = defaults.signed_url_ttl();
        Ok(Self {
            gate: DedupGate::new(hasher, index, store, cache),
            key_prefix: defaults.key_prefix,
            signed_url_ttl,
        })
    }

    /// Prefix for keys generated by [`upload`](Self::upload).
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Default lifetime of [`signed_url`](Self::signed_url).
    #[must_use]
    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    /// The dedup gate.
    #[must_use]
    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    /// The local cache.
    #[must_use]
    pub fn cache(&self) -> &LocalFileCache {
        self.gate.cache()
    }

    /// Digest of a local file.
    pub async fn digest(&self, path: &Path) -> Result<ContentDigest> {
        Ok(self.gate.hasher().digest(path).await?)
    }

    /// Local path holding the bytes of `remote_key`.
    pub async fn materialize(&self, owner: &OwnerId, remote_key: &str) -> Result<PathBuf> {
        self.cache().materialize(owner, remote_key).await
    }

    /// Bytes of the first file registered for `owner`, or `None` if the
    /// owner has no files.
    pub async fn read_owner_content(&self, owner: &OwnerId) -> Result<Option<Vec<u8>>> {
        let files = self.files(owner).await?;
        let Some(first) = files.first() else {
            log::debug!("Owner {} has no files", owner);
            return Ok(None);
        };
        self.cache()
            .read(&first.owner_id, &first.remote_key)
            .await
            .map(Some)
    }

    /// Remove cached copies for `owner`, or for everyone.
    pub async fn evict(&self, owner: Option<&OwnerId>) -> Result<()> {
        self.cache().evict(owner).await
    }

    /// Disk usage of the cache for `owner`, or for everyone.
    pub async fn usage(&self, owner: Option<&OwnerId>) -> Result<CacheUsage> {
        self.cache().usage(owner).await
    }

    /// Cache hit and miss counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    /// Register and upload `source` under an explicit key.
    pub async fn register_upload(
        &self,
        owner: &OwnerId,
        source: &Path,
        remote_key: &str,
    ) -> Result<FileRecord> {
        self.gate.register_upload(owner, source, remote_key).await
    }

    /// Register and upload `source` under a generated
    /// `<prefix>/<millis>_<filename>` key.
    pub async fn upload(&self, owner: &OwnerId, source: &Path) -> Result<FileRecord> {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::InvalidReference(format!("{} has no file name", source.display()))
            })?;
        let key = object_key(&self.key_prefix, &filename, Utc::now());
        self.register_upload(owner, source, &key).await
    }

    /// Records of `owner`, oldest first.
    pub async fn files(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        Ok(self.gate.index().files_for_owner(owner).await?)
    }

    /// Backfill the digest of record `id`.
    pub async fn backfill_digest(&self, id: FileId) -> Result<FileRecord> {
        let record = self.record(id).await?;
        self.gate.backfill_digest(&record).await
    }

    /// Backfill every record missing a digest.
    pub async fn backfill_all(&self, config: &BackfillConfig) -> Result<BackfillReport> {
        self.gate.backfill_all(config).await
    }

    /// Time-limited download URL for record `id`.
    ///
    /// `ttl` defaults to the configured signed URL lifetime.
    pub async fn signed_url(&self, id: FileId, ttl: Option<Duration>) -> Result<String> {
        let record = self.record(id).await?;
        self.gate
            .store()
            .signed_url(&record.remote_key, ttl.unwrap_or(self.signed_url_ttl))
            .await
            .map_err(|e| Error::storage(&record.remote_key, e))
    }

    async fn record(&self, id: FileId) -> Result<FileRecord> {
        self.gate
            .index()
            .get(id)
            .await?
            .ok_or(Error::Metadata(IndexError::NotFound(id)))
    }
}
