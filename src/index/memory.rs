//! In-memory file index.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{FileId, FileIndex, FileRecord, IndexError, NewFileRecord, OwnerId};
use crate::content::ContentDigest;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<FileId, FileRecord>,
    next_id: i64,
}

/// A map-backed [`FileIndex`] with the same uniqueness rules as the SQLite
/// index. Checks and inserts happen under one lock.
#[derive(Debug, Default)]
pub struct MemoryFileIndex {
    inner: Mutex<Inner>,
}

impl MemoryFileIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the index holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, pred: impl Fn(&FileRecord) -> bool) -> Option<FileRecord> {
        self.lock().records.values().find(|r| pred(r)).cloned()
    }

    fn filter(&self, pred: impl Fn(&FileRecord) -> bool) -> Vec<FileRecord> {
        self.lock()
            .records
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FileIndex for MemoryFileIndex {
    async fn find_by_digest(
        &self,
        digest: &ContentDigest,
    ) -> Result<Option<FileRecord>, IndexError> {
        Ok(self.find(|r| r.digest.as_ref() == Some(digest)))
    }

    async fn find_by_remote_key(&self, remote_key: &str) -> Result<Option<FileRecord>, IndexError> {
        Ok(self.find(|r| r.remote_key == remote_key))
    }

    async fn get(&self, id: FileId) -> Result<Option<FileRecord>, IndexError> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn files_for_owner(&self, owner: &OwnerId) -> Result<Vec<FileRecord>, IndexError> {
        Ok(self.filter(|r| &r.owner_id == owner))
    }

    async fn files_missing_digest(&self) -> Result<Vec<FileRecord>, IndexError> {
        Ok(self.filter(|r| r.digest.is_none()))
    }

    async fn create(&self, record: NewFileRecord) -> Result<FileRecord, IndexError> {
        let mut inner = self.lock();
        if let Some(digest) = &record.digest {
            if inner
                .records
                .values()
                .any(|r| r.digest.as_ref() == Some(digest))
            {
                return Err(IndexError::DuplicateDigest {
                    digest: digest.clone(),
                });
            }
        }
        if inner
            .records
            .values()
            .any(|r| r.remote_key == record.remote_key)
        {
            return Err(IndexError::DuplicateRemoteKey {
                key: record.remote_key,
            });
        }

        inner.next_id += 1;
        let id = FileId(inner.next_id);
        let stored = FileRecord {
            id,
            owner_id: record.owner_id,
            filename: record.filename,
            format: record.format,
            remote_key: record.remote_key,
            size: record.size,
            digest: record.digest,
            created_at: Utc::now(),
        };
        inner.records.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_digest(
        &self,
        id: FileId,
        digest: &ContentDigest,
    ) -> Result<FileRecord, IndexError> {
        let mut inner = self.lock();
        let current = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(IndexError::NotFound(id))?;
        if current.digest.is_some() {
            return Ok(current);
        }
        if inner
            .records
            .values()
            .any(|r| r.digest.as_ref() == Some(digest))
        {
            return Err(IndexError::DuplicateDigest {
                digest: digest.clone(),
            });
        }

        let record = inner.records.get_mut(&id).ok_or(IndexError::NotFound(id))?;
        record.digest = Some(digest.clone());
        Ok(record.clone())
    }

    async fn remove(&self, id: FileId) -> Result<(), IndexError> {
        self.lock().records.remove(&id);
        Ok(())
    }
}
