//! Local file cache for remotely stored book files.
//!
//! Reading a book needs its bytes on local disk. This module materializes
//! remote objects on demand (cache-aside) and keeps them until explicitly
//! evicted.
//!
//! # Architecture
//!
//! The cache is split into two components:
//!
//! * [`entry`]: Derives the deterministic local path of a [`FileReference`].
//! * [`local`]: [`LocalFileCache`], which checks, fetches, writes and evicts.
//!
//! # Freshness
//!
//! There is no separate index and no invalidation protocol. A file present
//! at the derived path is a hit and is returned without contacting the
//! object store; if the remote object is later replaced, the cached copy
//! keeps the old bytes until it is evicted.

pub mod entry;
pub mod local;

use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub use entry::{owner_dir, FileReference};
pub use local::LocalFileCache;

/// Hit/miss counters of a [`LocalFileCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls answered from disk without waiting
    pub hits: u64,
    /// Calls that fetched from the object store
    pub misses: u64,
    /// Calls that waited for a concurrent fetch of the same path
    pub coalesced: u64,
    /// Bytes downloaded by misses
    pub bytes_fetched: u64,
}

/// Disk usage below a cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    /// Number of cached files
    pub files: u64,
    /// Total size in bytes
    pub bytes: u64,
}

impl CacheUsage {
    /// Walk `dir` and total up regular files. A missing directory is empty.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut usage = Self::default();
        if !dir.exists() {
            return Ok(usage);
        }
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                Error::io(path, source)
            })?;
            if entry.file_type().is_file() {
                let meta = entry.metadata().map_err(|e| {
                    Error::io(
                        entry.path(),
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
                    )
                })?;
                usage.files += 1;
                usage.bytes += meta.len();
            }
        }
        Ok(usage)
    }
}
