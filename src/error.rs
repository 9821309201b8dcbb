//! Error taxonomy and exit codes.
//!
//! Every public operation of the cache, the dedup gate and the library
//! facade fails with [`Error`]. None of them retry internally: the caller
//! decides whether to try again and how to word the message for the user.

use serde::Serialize;
use std::path::PathBuf;

use crate::content::{ContentDigest, HashError};
use crate::index::{IndexError, InvalidOwnerId};
use crate::storage::StorageError;

/// Result alias for crate operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a cache, dedup or library operation.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A local disk operation failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The object store is unreachable or the object is missing.
    #[error("Storage unavailable for {key}: {source}")]
    StorageUnavailable {
        /// Object key involved
        key: String,
        /// The underlying store error
        #[source]
        source: StorageError,
    },

    /// The content is already stored.
    #[error("Duplicate content: digest {digest} is already stored{}", stored_as(.existing_key))]
    Duplicate {
        /// Digest of the rejected content
        digest: ContentDigest,
        /// Key of the record that already holds this content, when known
        existing_key: Option<String>,
    },

    /// The remote key is already occupied.
    #[error("Key conflict: {key} is already occupied in the object store")]
    Conflict {
        /// The occupied key
        key: String,
    },

    /// An owner id or remote key cannot be mapped to a cache path.
    #[error("Invalid file reference: {0}")]
    InvalidReference(String),

    /// The metadata index failed.
    #[error("Metadata index error: {0}")]
    Metadata(#[source] IndexError),
}

fn stored_as(existing_key: &Option<String>) -> String {
    existing_key
        .as_ref()
        .map(|k| format!(" as {}", k))
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn storage(key: impl Into<String>, source: StorageError) -> Self {
        match source {
            StorageError::InvalidKey(_) => Self::InvalidReference(source.to_string()),
            source => Self::StorageUnavailable {
                key: key.into(),
                source,
            },
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Duplicate { .. } => ExitCode::Duplicate,
            Self::Conflict { .. } => ExitCode::Conflict,
            Self::StorageUnavailable { .. } => ExitCode::StorageUnavailable,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<HashError> for Error {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Io { path, source } => Self::Io { path, source },
            HashError::NotFound(path) => Self::io(path, std::io::ErrorKind::NotFound.into()),
            HashError::PermissionDenied(path) => {
                Self::io(path, std::io::ErrorKind::PermissionDenied.into())
            }
        }
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DuplicateDigest { digest } => Self::Duplicate {
                digest,
                existing_key: None,
            },
            IndexError::DuplicateRemoteKey { key } => Self::Conflict { key },
            other => Self::Metadata(other),
        }
    }
}

impl From<InvalidOwnerId> for Error {
    fn from(err: InvalidOwnerId) -> Self {
        Self::InvalidReference(err.to_string())
    }
}

/// Exit codes for the shelfcache binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Duplicate content rejected
/// - 3: Remote key conflict
/// - 4: Object store unavailable
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: The command completed.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Duplicate: The uploaded content is already stored.
    Duplicate = 2,
    /// Conflict: The target key is already occupied.
    Conflict = 3,
    /// Storage unavailable: The object store could not serve the request.
    StorageUnavailable = 4,
    /// Interrupted: The command was interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "SC000",
            Self::GeneralError => "SC001",
            Self::Duplicate => "SC002",
            Self::Conflict => "SC003",
            Self::StorageUnavailable => "SC004",
            Self::Interrupted => "SC130",
        }
    }

    /// Exit code for an application error, looking through `anyhow` context.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<Error>())
            .map_or(Self::GeneralError, Error::exit_code)
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "SC002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
