//! shelfcache - local file cache and content-addressed deduplication for a
//! book library.
//!
//! Book files live in an object store and their metadata in an index. This
//! crate decides whether a new upload is a duplicate of stored content
//! ([`dedup`]), and materializes stored files onto local disk on demand
//! ([`cache`]). [`library::Library`] wires both together.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod content;
pub mod dedup;
pub mod error;
pub mod index;
pub mod library;
pub mod logging;
pub mod progress;
pub mod signal;
pub mod storage;

pub use app::run_app;
