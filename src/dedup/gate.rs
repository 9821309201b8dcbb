//! Upload admission by content digest.

use std::path::Path;
use std::sync::Arc;

use crate::cache::entry::cache_file_name;
use crate::cache::LocalFileCache;
use crate::content::{ContentDigest, ContentHasher};
use crate::error::{Error, Result};
use crate::index::{FileIndex, FileRecord, NewFileRecord, OwnerId};
use crate::storage::{key_segments, ObjectStore};

/// Admits new uploads only if their content and target key are both new.
///
/// The order of checks is fixed: hash locally, reject known content, reject
/// an occupied key, persist the record, then upload. Known duplicates are
/// therefore rejected before any bytes are sent.
pub struct DedupGate {
    hasher: ContentHasher,
    index: Arc<dyn FileIndex>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<LocalFileCache>,
}

impl std::fmt::Debug for DedupGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupGate")
            .field("hasher", &self.hasher)
            .field("index", &"<index>")
            .field("bucket", &self.store.bucket())
            .field("cache", &self.cache.root())
            .finish()
    }
}

impl DedupGate {
    /// Wire a gate from its collaborators.
    #[must_use]
    pub fn new(
        hasher: ContentHasher,
        index: Arc<dyn FileIndex>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<LocalFileCache>,
    ) -> Self {
        Self {
            hasher,
            index,
            store,
            cache,
        }
    }

    /// The hasher used for admission and backfill.
    #[must_use]
    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// The metadata index consulted for digests and keys.
    #[must_use]
    pub fn index(&self) -> &Arc<dyn FileIndex> {
        &self.index
    }

    /// The object store uploads are written to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The cache used to materialize files for backfill.
    #[must_use]
    pub fn cache(&self) -> &Arc<LocalFileCache> {
        &self.cache
    }

    /// Register and upload `source` under `remote_key` for `owner`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidReference`] if `remote_key` is not a usable object
    ///   key or has no file name to cache it under
    /// * [`Error::Io`] if `source` cannot be read, or changes while it is
    ///   being uploaded
    /// * [`Error::Duplicate`] if a record with the same digest exists; the
    ///   object store is never written
    /// * [`Error::Conflict`] if `remote_key` is already occupied
    /// * [`Error::StorageUnavailable`] if the existence check or the upload
    ///   fails; a record created for this upload is removed again
    pub async fn register_upload(
        &self,
        owner: &OwnerId,
        source: &Path,
        remote_key: &str,
    ) -> Result<FileRecord> {
        validate_remote_key(remote_key)?;

        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::io(source, e))?;
        if !metadata.is_file() {
            return Err(Error::io(
                source,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let digest = self.hasher.digest(source).await?;

        if let Some(existing) = self.index.find_by_digest(&digest).await? {
            log::info!(
                "Rejected {}: content {} already stored as {}",
                source.display(),
                digest.short(),
                existing.remote_key
            );
            return Err(Error::Duplicate {
                digest,
                existing_key: Some(existing.remote_key),
            });
        }

        let occupied = self
            .store
            .head_object(remote_key)
            .await
            .map_err(|e| Error::storage(remote_key, e))?;
        if occupied {
            log::info!("Rejected {}: key {} is occupied", source.display(), remote_key);
            return Err(Error::Conflict {
                key: remote_key.to_string(),
            });
        }

        let record = self
            .index
            .create(NewFileRecord::for_source(
                owner.clone(),
                source,
                remote_key,
                metadata.len(),
                Some(digest.clone()),
            ))
            .await?;

        if let Err(err) = self.upload(source, remote_key, &digest).await {
            if let Err(rollback) = self.index.remove(record.id).await {
                log::warn!(
                    "Failed to remove record {} after aborted upload: {}",
                    record.id,
                    rollback
                );
            }
            return Err(err);
        }

        log::info!(
            "Uploaded {} as {}/{} ({} bytes, owner {})",
            record.filename,
            self.store.bucket(),
            record.remote_key,
            record.size,
            record.owner_id
        );
        Ok(record)
    }

    /// Compute and store the digest of a record registered without one.
    ///
    /// The file is materialized through the local cache and hashed there. A
    /// record that already has a digest is returned unchanged without any
    /// fetch, and the index never replaces a digest written concurrently.
    ///
    /// The cache is keyed by owner and basename, so two keys of one owner
    /// that end in the same file name (`legacy/a.epub` and `books/a.epub`)
    /// share a cached copy. Backfilling the second one hashes whatever the
    /// first one left in the cache; evict the owner first when such keys
    /// exist.
    ///
    /// # Errors
    ///
    /// [`Error::Duplicate`] if another record already carries the computed
    /// digest, plus the errors of [`LocalFileCache::materialize`].
    pub async fn backfill_digest(&self, record: &FileRecord) -> Result<FileRecord> {
        if record.digest.is_some() {
            log::debug!("Record {} already has a digest", record.id);
            return Ok(record.clone());
        }

        let path = self
            .cache
            .materialize(&record.owner_id, &record.remote_key)
            .await?;
        let digest = self.hasher.digest(&path).await?;

        match self.index.update_digest(record.id, &digest).await {
            Ok(updated) => {
                log::info!(
                    "Backfilled digest {} for {}",
                    digest.short(),
                    record.remote_key
                );
                Ok(updated)
            }
            Err(err) => {
                let mut err = Error::from(err);
                if let Error::Duplicate { existing_key, .. } = &mut err {
                    *existing_key = self
                        .index
                        .find_by_digest(&digest)
                        .await
                        .ok()
                        .flatten()
                        .map(|r| r.remote_key);
                }
                Err(err)
            }
        }
    }

    /// Upload `source` only if it still hashes to `expected`.
    async fn upload(
        &self,
        source: &Path,
        remote_key: &str,
        expected: &ContentDigest,
    ) -> Result<()> {
        let body = tokio::fs::read(source)
            .await
            .map_err(|e| Error::io(source, e))?;
        if self.hasher.digest_bytes(&body) != *expected {
            return Err(Error::io(
                source,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file changed after it was hashed",
                ),
            ));
        }
        self.store
            .put_object(remote_key, body)
            .await
            .map_err(|e| Error::storage(remote_key, e))
    }
}

/// A key must be storable and must name a file the cache can hold.
fn validate_remote_key(remote_key: &str) -> Result<()> {
    key_segments(remote_key).map_err(|e| Error::InvalidReference(e.to_string()))?;
    cache_file_name(remote_key)?;
    Ok(())
}
