//! Object key naming.

use chrono::{DateTime, Utc};

/// Build the object key for a new upload of `filename`.
///
/// Keys have the form `<prefix>/<unix millis>_<filename>`. Only the final
/// path component of `filename` is kept, so a caller passing a full path
/// does not create nested keys. An empty prefix yields a key without a
/// leading slash.
#[must_use]
pub fn object_key(prefix: &str, filename: &str, now: DateTime<Utc>) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}_{}", now.timestamp_millis(), name)
    } else {
        format!("{}/{}_{}", prefix, now.timestamp_millis(), name)
    }
}
