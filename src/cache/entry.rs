//! Cache entry addressing.
//!
//! A cache entry has no record of its own: its location is a pure function
//! of the [`FileReference`] it caches,
//!
//! ```text
//! <cache root>/<owner id>/<basename of remote key>
//! ```
//!
//! and the file existing at that location is the cache-hit signal.
//!
//! Basenames are normalized to NFC so that a key uploaded from macOS (NFD)
//! and the same key typed elsewhere (NFC) land on one cache file.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use unicode_normalization::{is_nfc, UnicodeNormalization};

use crate::error::{Error, Result};
use crate::index::{FileRecord, OwnerId};

/// A remote object logically owned by a book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    /// Owning entity
    pub owner_id: OwnerId,
    /// Object store key
    pub remote_key: String,
}

impl FileReference {
    /// Create a reference.
    #[must_use]
    pub fn new(owner_id: OwnerId, remote_key: impl Into<String>) -> Self {
        Self {
            owner_id,
            remote_key: remote_key.into(),
        }
    }

    /// The file name this reference is cached under.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidReference`] if the key has no usable last segment.
    pub fn cache_file_name(&self) -> Result<Cow<'_, str>> {
        cache_file_name(&self.remote_key)
    }

    /// Location of the cached copy below `root`.
    pub fn local_path(&self, root: &Path) -> Result<PathBuf> {
        let name = self.cache_file_name()?;
        Ok(owner_dir(root, &self.owner_id).join(name.as_ref()))
    }
}

impl From<&FileRecord> for FileReference {
    fn from(record: &FileRecord) -> Self {
        Self::new(record.owner_id.clone(), record.remote_key.clone())
    }
}

/// Directory holding every cached file of `owner`.
#[must_use]
pub fn owner_dir(root: &Path, owner: &OwnerId) -> PathBuf {
    root.join(owner.as_str())
}

/// Last `/`-separated segment of `remote_key`, NFC-normalized.
pub(crate) fn cache_file_name(remote_key: &str) -> Result<Cow<'_, str>> {
    let name = remote_key.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains(['\\', '\0']) {
        return Err(Error::InvalidReference(format!(
            "remote key {:?} has no usable file name",
            remote_key
        )));
    }
    if is_nfc(name) {
        Ok(Cow::Borrowed(name))
    } else {
        Ok(Cow::Owned(name.nfc().collect()))
    }
}
