//! Command-line interface definitions for shelfcache.
//!
//! The binary is an administrative front end to [`Library`]: it hashes,
//! uploads, fetches and evicts files of a library configured through
//! [`Config`].
//!
//! # Example
//!
//! ```bash
//! # Upload a book for owner 42 under a generated key
//! shelfcache upload --owner 42 ~/Downloads/Dune.epub
//!
//! # Materialize it into the local cache
//! shelfcache fetch --owner 42 books/1700000000000_Dune.epub
//!
//! # Compute digests for files uploaded before hashing existed
//! shelfcache -v backfill
//! ```
//!
//! [`Library`]: crate::library::Library
//! [`Config`]: crate::config::Config

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::content::DigestAlgorithm;
use crate::index::OwnerId;

/// Local file cache and content-addressed deduplication for a book library.
#[derive(Debug, Parser)]
#[command(name = "shelfcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a TOML config file
    #[arg(long, value_name = "PATH", global = true, env = "SHELFCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the local cache root
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_root: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the content digest of a local file
    Digest(DigestArgs),
    /// Upload a file unless its content or key is already stored
    Upload(UploadArgs),
    /// Materialize a remote file into the local cache and print its path
    Fetch(FetchArgs),
    /// Remove cached files for one owner or for everyone
    Evict(OwnerFilterArgs),
    /// Show disk usage of the local cache
    Usage(OwnerFilterArgs),
    /// List the files registered for an owner
    Files(FilesArgs),
    /// Compute missing digests of previously uploaded files
    Backfill(BackfillArgs),
    /// Print a time-limited download URL for a file
    Url(UrlArgs),
    /// Switch the library to another digest algorithm
    Migrate(MigrateArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Arguments for the digest subcommand.
#[derive(Debug, Args)]
pub struct DigestArgs {
    /// File to hash
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

/// Arguments for the upload subcommand.
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Owning book id
    #[arg(long, value_name = "ID")]
    pub owner: OwnerId,

    /// Local file to upload
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Explicit object key (default: `<prefix>/<millis>_<filename>`)
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,
}

/// Arguments for the fetch subcommand.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Owning book id
    #[arg(long, value_name = "ID")]
    pub owner: OwnerId,

    /// Object key to materialize
    #[arg(value_name = "KEY")]
    pub key: String,
}

/// Optional owner restriction for evict and usage.
#[derive(Debug, Args)]
pub struct OwnerFilterArgs {
    /// Restrict to one owner (default: the whole cache)
    #[arg(long, value_name = "ID")]
    pub owner: Option<OwnerId>,
}

/// Arguments for the files subcommand.
#[derive(Debug, Args)]
pub struct FilesArgs {
    /// Owning book id
    #[arg(long, value_name = "ID")]
    pub owner: OwnerId,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the backfill subcommand.
#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the url subcommand.
#[derive(Debug, Args)]
pub struct UrlArgs {
    /// File record id
    #[arg(value_name = "FILE_ID")]
    pub file_id: i64,

    /// URL lifetime in seconds (default: `signed_url_ttl_secs`)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub ttl: Option<u64>,
}

/// Arguments for the migrate subcommand.
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Target algorithm (sha256 or blake3)
    #[arg(value_name = "ALGORITHM")]
    pub algorithm: DigestAlgorithm,
}
