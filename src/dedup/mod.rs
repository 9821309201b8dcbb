//! Content-addressed deduplication of uploads.
//!
//! # Architecture
//!
//! * [`gate`]: [`DedupGate`], which admits an upload only when neither its
//!   content nor its target key is already stored, and fills in digests for
//!   records registered before hashing existed.
//! * [`backfill`]: Batch digest completion over every record that lacks one,
//!   with progress reporting and graceful interruption.
//! * [`keys`]: Default object key naming for new uploads.
//!
//! # Uniqueness
//!
//! Two uploads with identical bytes have identical digests regardless of
//! file name, owner or target key. The metadata index enforces digest and
//! key uniqueness itself, so two concurrent uploads of the same content
//! cannot both be admitted even though the gate checks first and writes
//! second.

pub mod backfill;
pub mod gate;
pub mod keys;

pub use backfill::{BackfillConfig, BackfillOutcome, BackfillReport, BackfillStatus};
pub use gate::DedupGate;
pub use keys::object_key;
