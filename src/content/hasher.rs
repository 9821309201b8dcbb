//! Streaming file hasher.
//!
//! Files are read sequentially through a fixed-size buffer and fed into the
//! hash accumulator, so hashing a several-hundred-megabyte book costs the
//! same memory as hashing a tiny one.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

use super::{ContentDigest, DigestAlgorithm, HashError};

/// Default read buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Computes [`ContentDigest`]s of files and byte slices.
///
/// Stateless apart from its settings; cheap to clone and safe to share.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    algorithm: DigestAlgorithm,
    buffer_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DigestAlgorithm::default())
    }
}

impl ContentHasher {
    /// Create a hasher for `algorithm` with the default buffer size.
    #[must_use]
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the read buffer size. Zero is clamped to 1 byte.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// The algorithm this hasher produces.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Hash a file in a single streaming pass.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or a read fails
    /// part-way through.
    pub async fn digest(&self, path: &Path) -> Result<ContentDigest, HashError> {
        let file = File::open(path)
            .await
            .map_err(|e| HashError::from_io(path.to_path_buf(), e))?;

        let mut reader = BufReader::with_capacity(self.buffer_size, file);
        let mut accumulator = Accumulator::new(self.algorithm);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| HashError::from_io(path.to_path_buf(), e))?;
            if bytes_read == 0 {
                break;
            }
            accumulator.update(&buffer[..bytes_read]);
            total += bytes_read as u64;
        }

        let digest = accumulator.finish();
        log::trace!(
            "Hashed {} ({} bytes) -> {}:{}",
            path.display(),
            total,
            digest.algorithm(),
            digest.short()
        );
        Ok(digest)
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn digest_bytes(&self, bytes: &[u8]) -> ContentDigest {
        let mut accumulator = Accumulator::new(self.algorithm);
        accumulator.update(bytes);
        accumulator.finish()
    }
}

enum Accumulator {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Accumulator {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finish(self) -> ContentDigest {
        match self {
            Self::Sha256(h) => ContentDigest::from_bytes(DigestAlgorithm::Sha256, &h.finalize()),
            Self::Blake3(h) => {
                ContentDigest::from_bytes(DigestAlgorithm::Blake3, h.finalize().as_bytes())
            }
        }
    }
}
