//! Content fingerprints for stored book files.
//!
//! This module provides:
//! - [`ContentDigest`]: a fixed-length hex fingerprint tagged with the
//!   algorithm that produced it
//! - [`DigestAlgorithm`]: the supported hash schemes
//! - [`ContentHasher`]: a streaming hasher whose memory use does not depend
//!   on file size
//!
//! A library uses exactly one algorithm at a time. Digests produced by
//! different algorithms never compare equal, even if their hex strings
//! happened to collide.
//!
//! # Example
//!
//! ```no_run
//! use shelfcache::content::{ContentHasher, DigestAlgorithm};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), shelfcache::content::HashError> {
//! let hasher = ContentHasher::new(DigestAlgorithm::Sha256);
//! let digest = hasher.digest(Path::new("book.epub")).await?;
//! println!("{}", digest);
//! # Ok(())
//! # }
//! ```

pub mod hasher;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use hasher::{ContentHasher, DEFAULT_BUFFER_SIZE};

/// Hash scheme used to fingerprint file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// BLAKE3, 256-bit output.
    Blake3,
}

impl DigestAlgorithm {
    /// Stable lowercase name, as persisted in the metadata index.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Number of hex characters in a digest produced by this algorithm.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(DigestParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A content fingerprint: lowercase hex of the hash of a file's full bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl ContentDigest {
    /// Parse a hex digest produced by `algorithm`.
    ///
    /// Uppercase input is accepted and normalized to lowercase.
    pub fn from_hex(algorithm: DigestAlgorithm, hex: &str) -> Result<Self, DigestParseError> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() {
            return Err(DigestParseError::InvalidLength {
                algorithm,
                expected: algorithm.hex_len(),
                actual: hex.len(),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestParseError::InvalidHex(hex));
        }
        Ok(Self { algorithm, hex })
    }

    pub(crate) fn from_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> Self {
        let hex = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self { algorithm, hex }
    }

    /// The algorithm that produced this digest.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The lowercase hex string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.hex[..12.min(self.hex.len())]
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Errors when parsing a digest or algorithm name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestParseError {
    /// The algorithm name is not recognized.
    #[error("Unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The hex string has the wrong length for its algorithm.
    #[error("Invalid {algorithm} digest length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Algorithm the digest claims to come from
        algorithm: DigestAlgorithm,
        /// Expected hex length
        expected: usize,
        /// Actual hex length
        actual: usize,
    },

    /// The string contains non-hex characters.
    #[error("Invalid hex digest: {0}")]
    InvalidHex(String),
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    pub(crate) fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source },
        }
    }

    /// Path of the file that failed to hash.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound(path) | Self::PermissionDenied(path) => path,
            Self::Io { path, .. } => path,
        }
    }
}
