//! Layered configuration.
//!
//! Values are merged with `figment` in increasing priority:
//!
//! 1. Built-in defaults (platform data directory from `directories`)
//! 2. A TOML file (`config.toml` in the platform config directory, or the
//!    path given with `--config`)
//! 3. `SHELFCACHE_*` environment variables (`SHELFCACHE_BUCKET=archive`)
//! 4. CLI flags, applied by the binary through [`Config::merge_cli`]
//!
//! # Example
//!
//! ```toml
//! cache_root = "/home/me/.shelfcache/books"
//! digest_algorithm = "blake3"
//! signed_url_ttl_secs = 600
//! ```

use directories::{BaseDirs, ProjectDirs};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content::{DigestAlgorithm, DEFAULT_BUFFER_SIZE};

/// Prefix of the environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "SHELFCACHE_";

/// Error loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    MissingFile(PathBuf),

    /// A layer could not be parsed or has a wrongly typed value.
    #[error("Invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// A value parsed but is out of range.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Config key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Effective settings for one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the local file cache
    pub cache_root: PathBuf,
    /// SQLite metadata index
    pub index_path: PathBuf,
    /// Root of the directory-backed object store
    pub object_root: PathBuf,
    /// Object store bucket name
    pub bucket: String,
    /// Prefix of generated object keys
    pub key_prefix: String,
    /// Digest algorithm the library is pinned to
    pub digest_algorithm: DigestAlgorithm,
    /// Lifetime of signed URLs in seconds
    pub signed_url_ttl_secs: u64,
    /// Read buffer of the content hasher in bytes
    pub hash_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            cache_root: data.join("books"),
            index_path: data.join("library.db"),
            object_root: data.join("objects"),
            bucket: "books".to_string(),
            key_prefix: "books".to_string(),
            digest_algorithm: DigestAlgorithm::default(),
            signed_url_ttl_secs: 3600,
            hash_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// The merged figment for an optional explicit config file.
    ///
    /// Without `path` the platform default file is used if it exists.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = path.map(Path::to_path_buf).or_else(default_config_path) {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load and validate configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingFile`] if `path` is given but absent, otherwise
    /// any parse or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate from an already assembled figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides on top of the loaded layers.
    pub fn merge_cli(&mut self, cache_root: Option<PathBuf>) {
        if let Some(root) = cache_root {
            self.cache_root = root;
        }
    }

    /// Reject values that would make the library unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() || self.bucket.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                key: "bucket",
                reason: format!("{:?} must be a single non-empty name", self.bucket),
            });
        }
        if self.key_prefix.contains('\\') || self.key_prefix.split('/').any(|s| s == "..") {
            return Err(ConfigError::Invalid {
                key: "key_prefix",
                reason: format!("{:?} is not a valid key prefix", self.key_prefix),
            });
        }
        if self.signed_url_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "signed_url_ttl_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.hash_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "hash_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Signed URL lifetime.
    #[must_use]
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    /// Render as TOML, for `shelfcache config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Platform configuration file, e.g. `~/.config/shelfcache/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "shelfcache", "shelfcache")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("com", "shelfcache", "shelfcache") {
        return dirs.data_dir().to_path_buf();
    }
    BaseDirs::new()
        .map(|b| b.home_dir().join(".shelfcache"))
        .unwrap_or_else(|| PathBuf::from(".shelfcache"))
}
