//! File metadata index.
//!
//! Every stored book file has a [`FileRecord`]: who owns it, where its bytes
//! live in the object store, and (once computed) its content digest. The
//! index is the authority for two uniqueness rules:
//!
//! * no two records share a [`ContentDigest`]
//! * no two records share a remote key
//!
//! Both rules are enforced at write time by [`FileIndex::create`] and
//! [`FileIndex::update_digest`], independently of any pre-check a caller
//! performs.
//!
//! # Implementations
//!
//! * [`database`]: SQLite-backed, persistent ([`SqliteFileIndex`])
//! * [`memory`]: map-backed, for tests ([`MemoryFileIndex`])

pub mod database;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::content::{ContentDigest, DigestAlgorithm};

pub use database::SqliteFileIndex;
pub use memory::MemoryFileIndex;

/// Opaque identifier of the entity (a book) that owns stored files.
///
/// Owner ids double as cache directory names, so they must be a single,
/// non-empty path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Validate and wrap an owner id.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidOwnerId> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0']);
        if valid {
            Ok(Self(id))
        } else {
            Err(InvalidOwnerId(id))
        }
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = InvalidOwnerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl std::str::FromStr for OwnerId {
    type Err = InvalidOwnerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An owner id that cannot be used as a single path component.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid owner id: {0:?}")]
pub struct InvalidOwnerId(pub String);

/// Row id of a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row id
    pub id: FileId,
    /// Owning book
    pub owner_id: OwnerId,
    /// Original file name at upload time
    pub filename: String,
    /// Lowercase extension without the dot (`epub`, `pdf`, ...)
    pub format: String,
    /// Object store key holding the bytes
    pub remote_key: String,
    /// Size in bytes
    pub size: u64,
    /// Content digest; `None` for files registered before dedup existed
    pub digest: Option<ContentDigest>,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// A record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    /// Owning book
    pub owner_id: OwnerId,
    /// Original file name
    pub filename: String,
    /// Lowercase extension without the dot
    pub format: String,
    /// Object store key
    pub remote_key: String,
    /// Size in bytes
    pub size: u64,
    /// Content digest, if known
    pub digest: Option<ContentDigest>,
}

impl NewFileRecord {
    /// Build a record for a local source file, deriving `filename` and
    /// `format` from its path.
    #[must_use]
    pub fn for_source(
        owner_id: OwnerId,
        source: &Path,
        remote_key: impl Into<String>,
        size: u64,
        digest: Option<ContentDigest>,
    ) -> Self {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            owner_id,
            filename,
            format,
            remote_key: remote_key.into(),
            size,
            digest,
        }
    }
}

/// Metadata store consumed by the dedup gate and the backfill pass.
#[async_trait]
pub trait FileIndex: Send + Sync {
    /// The record carrying `digest`, if any.
    async fn find_by_digest(
        &self,
        digest: &ContentDigest,
    ) -> Result<Option<FileRecord>, IndexError>;

    /// The record stored under `remote_key`, if any.
    async fn find_by_remote_key(&self, remote_key: &str) -> Result<Option<FileRecord>, IndexError>;

    /// The record with row id `id`, if any.
    async fn get(&self, id: FileId) -> Result<Option<FileRecord>, IndexError>;

    /// All records owned by `owner`, oldest first.
    async fn files_for_owner(&self, owner: &OwnerId) -> Result<Vec<FileRecord>, IndexError>;

    /// All records without a digest, oldest first.
    async fn files_missing_digest(&self) -> Result<Vec<FileRecord>, IndexError>;

    /// Persist a new record.
    ///
    /// Fails with [`IndexError::DuplicateDigest`] or
    /// [`IndexError::DuplicateRemoteKey`] if either uniqueness rule would be
    /// broken.
    async fn create(&self, record: NewFileRecord) -> Result<FileRecord, IndexError>;

    /// Set the digest of record `id` if it has none, and return the record
    /// as stored afterwards. An existing digest is never replaced.
    async fn update_digest(
        &self,
        id: FileId,
        digest: &ContentDigest,
    ) -> Result<FileRecord, IndexError>;

    /// Delete record `id`. Deleting a missing record is not an error.
    async fn remove(&self, id: FileId) -> Result<(), IndexError>;
}

/// Errors reported by a [`FileIndex`].
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// Another record already carries this digest.
    #[error("Digest {digest} is already registered")]
    DuplicateDigest {
        /// The conflicting digest
        digest: ContentDigest,
    },

    /// Another record already uses this remote key.
    #[error("Remote key {key} is already registered")]
    DuplicateRemoteKey {
        /// The conflicting key
        key: String,
    },

    /// The record does not exist.
    #[error("File record {0} not found")]
    NotFound(FileId),

    /// The index was created for a different digest algorithm.
    #[error(
        "Index uses {stored} digests but {configured} is configured; run a digest migration first"
    )]
    AlgorithmMismatch {
        /// Algorithm pinned in the index
        stored: DigestAlgorithm,
        /// Algorithm the caller asked for
        configured: DigestAlgorithm,
    },

    /// A stored value could not be decoded.
    #[error("Corrupt index row: {0}")]
    Corrupt(String),

    /// SQLite failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A blocking index task panicked or was cancelled.
    #[error("Index task failed: {0}")]
    Task(String),
}
