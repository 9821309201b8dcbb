//! Object storage seam.
//!
//! The bytes of every book file live in an S3-compatible bucket. This crate
//! only consumes the bucket through [`ObjectStore`]; two implementations
//! ship with it:
//!
//! * [`DirObjectStore`]: a bucket laid out as a plain directory tree, e.g. a
//!   mounted volume
//! * [`MemoryObjectStore`]: a map-backed store that counts calls, used by
//!   tests and benchmarks

pub mod dir;
pub mod memory;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub use dir::DirObjectStore;
pub use memory::MemoryObjectStore;

/// Blob storage consumed by the cache and the dedup gate.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket every key lives in.
    fn bucket(&self) -> &str;

    /// Whether an object exists under `key`.
    async fn head_object(&self, key: &str) -> Result<bool, StorageError>;

    /// Fetch the full body of the object under `key`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// A URL granting read access to `key` for `ttl`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Errors reported by an [`ObjectStore`].
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// No object exists under the key.
    #[error("Object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },

    /// The key cannot be used with this store.
    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    /// The store could not be reached.
    #[error("Object store unreachable: {0}")]
    Unreachable(String),

    /// A local I/O error inside the store implementation.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Split `key` into path segments, rejecting empty, `.` and `..` segments.
pub(crate) fn key_segments(key: &str) -> Result<Vec<&str>, StorageError> {
    let segments: Vec<&str> = key.split('/').collect();
    let valid = !key.is_empty()
        && !key.contains('\\')
        && segments
            .iter()
            .all(|s| !s.is_empty() && *s != "." && *s != "..");
    if valid {
        Ok(segments)
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
