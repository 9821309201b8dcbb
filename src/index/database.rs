//! SQLite-backed file metadata index.
//!
//! Uniqueness of digests and remote keys is enforced by `UNIQUE` columns, so
//! two concurrent registrations of the same content cannot both commit even
//! if both passed the dedup pre-check.
//!
//! The index pins the digest algorithm it was created with in the `meta`
//! table. Opening it with another algorithm fails until
//! [`SqliteFileIndex::migrate_algorithm`] has cleared the old digests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{FileId, FileIndex, FileRecord, IndexError, NewFileRecord, OwnerId};
use crate::content::{ContentDigest, DigestAlgorithm};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        format TEXT NOT NULL,
        remote_key TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        digest_algorithm TEXT,
        digest TEXT UNIQUE,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

const COLUMNS: &str =
    "id, owner_id, filename, format, remote_key, size, digest_algorithm, digest, created_at";

const ALGORITHM_KEY: &str = "digest_algorithm";

/// Persistent [`FileIndex`] on a single SQLite database file.
///
/// The connection is shared behind a mutex; every query runs on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteFileIndex {
    path: PathBuf,
    algorithm: DigestAlgorithm,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFileIndex {
    /// Open or create the index at `path` for digests of `algorithm`.
    ///
    /// # Errors
    ///
    /// [`IndexError::AlgorithmMismatch`] if the index was created for a
    /// different algorithm.
    pub fn open(path: &Path, algorithm: DigestAlgorithm) -> Result<Self, IndexError> {
        let conn = open_connection(path)?;
        match stored_algorithm(&conn)? {
            Some(stored) if stored != algorithm => {
                return Err(IndexError::AlgorithmMismatch {
                    stored,
                    configured: algorithm,
                });
            }
            Some(_) => {}
            None => pin_algorithm(&conn, algorithm)?,
        }

        log::debug!(
            "Opened file index {} ({} digests)",
            path.display(),
            algorithm
        );
        Ok(Self {
            path: path.to_path_buf(),
            algorithm,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory index (used by tests).
    pub fn open_in_memory(algorithm: DigestAlgorithm) -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        pin_algorithm(&conn, algorithm)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            algorithm,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Switch the index at `path` to `algorithm`.
    ///
    /// Clears every stored digest in one transaction and re-pins the
    /// algorithm; a digest backfill afterwards recomputes them. Returns the
    /// number of digests cleared. Migrating to the already-pinned algorithm
    /// is a no-op.
    pub fn migrate_algorithm(path: &Path, algorithm: DigestAlgorithm) -> Result<usize, IndexError> {
        let mut conn = open_connection(path)?;
        if stored_algorithm(&conn)? == Some(algorithm) {
            log::info!("Index already uses {} digests", algorithm);
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let cleared = tx.execute(
            "UPDATE files SET digest = NULL, digest_algorithm = NULL WHERE digest IS NOT NULL",
            [],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![ALGORITHM_KEY, algorithm.as_str()],
        )?;
        tx.commit()?;

        log::info!(
            "Migrated index {} to {} digests ({} cleared)",
            path.display(),
            algorithm,
            cleared
        );
        Ok(cleared)
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pinned digest algorithm.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, IndexError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // A poisoned mutex only means another query panicked; SQLite
            // itself rolled back whatever that query had open.
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }
}

fn open_connection(path: &Path) -> Result<Connection, IndexError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::Corrupt(format!(
                    "cannot create index directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn stored_algorithm(conn: &Connection) -> Result<Option<DigestAlgorithm>, IndexError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![ALGORITHM_KEY],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| {
            v.parse()
                .map_err(|e| IndexError::Corrupt(format!("meta.{}: {}", ALGORITHM_KEY, e)))
        })
        .transpose()
}

fn pin_algorithm(conn: &Connection, algorithm: DigestAlgorithm) -> Result<(), IndexError> {
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
        params![ALGORITHM_KEY, algorithm.as_str()],
    )?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let conversion = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            msg.into(),
        )
    };

    let owner: String = row.get(1)?;
    let owner_id = OwnerId::new(owner).map_err(|e| conversion(1, e.to_string()))?;

    let algorithm: Option<String> = row.get(6)?;
    let hex: Option<String> = row.get(7)?;
    let digest = match (algorithm, hex) {
        (Some(alg), Some(hex)) => {
            let alg: DigestAlgorithm = alg.parse().map_err(|e: crate::content::DigestParseError| {
                conversion(6, e.to_string())
            })?;
            Some(ContentDigest::from_hex(alg, &hex).map_err(|e| conversion(7, e.to_string()))?)
        }
        _ => None,
    };

    let size: i64 = row.get(5)?;
    let created_millis: i64 = row.get(8)?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_millis)
        .ok_or_else(|| conversion(8, format!("timestamp out of range: {}", created_millis)))?;

    Ok(FileRecord {
        id: FileId(row.get(0)?),
        owner_id,
        filename: row.get(2)?,
        format: row.get(3)?,
        remote_key: row.get(4)?,
        size: u64::try_from(size).unwrap_or(0),
        digest,
        created_at,
    })
}

fn query_one(
    conn: &Connection,
    filter: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Option<FileRecord>, IndexError> {
    let sql = format!("SELECT {} FROM files WHERE {}", COLUMNS, filter);
    Ok(conn.query_row(&sql, &[param], row_to_record).optional()?)
}

fn query_many(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<FileRecord>, IndexError> {
    let sql = format!("SELECT {} FROM files WHERE {} ORDER BY id", COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Map a `UNIQUE` violation to the matching duplicate error.
fn map_constraint(err: rusqlite::Error, key: &str, digest: Option<&ContentDigest>) -> IndexError {
    if let rusqlite::Error::SqliteFailure(ref failure, Some(ref message)) = err {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("files.digest") {
                if let Some(digest) = digest {
                    return IndexError::DuplicateDigest {
                        digest: digest.clone(),
                    };
                }
            }
            if message.contains("files.remote_key") {
                return IndexError::DuplicateRemoteKey {
                    key: key.to_string(),
                };
            }
        }
    }
    IndexError::Database(err)
}

fn check_algorithm(expected: DigestAlgorithm, digest: &ContentDigest) -> Result<(), IndexError> {
    if digest.algorithm() == expected {
        Ok(())
    } else {
        Err(IndexError::AlgorithmMismatch {
            stored: expected,
            configured: digest.algorithm(),
        })
    }
}

#[async_trait]
impl FileIndex for SqliteFileIndex {
    async fn find_by_digest(
        &self,
        digest: &ContentDigest,
    ) -> Result<Option<FileRecord>, IndexError> {
        if digest.algorithm() != self.algorithm {
            return Ok(None);
        }
        let hex = digest.as_hex().to_string();
        self.with_conn(move |conn| query_one(conn, "digest = ?1", &hex))
            .await
    }

    async fn find_by_remote_key(&self, remote_key: &str) -> Result<Option<FileRecord>, IndexError> {
        let key = remote_key.to_string();
        self.with_conn(move |conn| query_one(conn, "remote_key = ?1", &key))
            .await
    }

    async fn get(&self, id: FileId) -> Result<Option<FileRecord>, IndexError> {
        self.with_conn(move |conn| query_one(conn, "id = ?1", &id.0))
            .await
    }

    async fn files_for_owner(&self, owner: &OwnerId) -> Result<Vec<FileRecord>, IndexError> {
        let owner = owner.as_str().to_string();
        self.with_conn(move |conn| query_many(conn, "owner_id = ?1", &[&owner]))
            .await
    }

    async fn files_missing_digest(&self) -> Result<Vec<FileRecord>, IndexError> {
        self.with_conn(|conn| query_many(conn, "digest IS NULL", &[]))
            .await
    }

    async fn create(&self, record: NewFileRecord) -> Result<FileRecord, IndexError> {
        if let Some(digest) = &record.digest {
            check_algorithm(self.algorithm, digest)?;
        }
        self.with_conn(move |conn| {
            let created_at = Utc::now();
            let size = i64::try_from(record.size)
                .map_err(|_| IndexError::Corrupt(format!("size too large: {}", record.size)))?;
            conn.execute(
                "INSERT INTO files
                    (owner_id, filename, format, remote_key, size, digest_algorithm, digest, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.owner_id.as_str(),
                    record.filename,
                    record.format,
                    record.remote_key,
                    size,
                    record.digest.as_ref().map(|d| d.algorithm().as_str()),
                    record.digest.as_ref().map(|d| d.as_hex()),
                    created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| map_constraint(e, &record.remote_key, record.digest.as_ref()))?;

            let id = FileId(conn.last_insert_rowid());
            query_one(conn, "id = ?1", &id.0)?.ok_or(IndexError::NotFound(id))
        })
        .await
    }

    async fn update_digest(
        &self,
        id: FileId,
        digest: &ContentDigest,
    ) -> Result<FileRecord, IndexError> {
        check_algorithm(self.algorithm, digest)?;
        let digest = digest.clone();
        self.with_conn(move |conn| {
            let existing = query_one(conn, "id = ?1", &id.0)?.ok_or(IndexError::NotFound(id))?;
            conn.execute(
                "UPDATE files SET digest_algorithm = ?1, digest = ?2
                 WHERE id = ?3 AND digest IS NULL",
                params![digest.algorithm().as_str(), digest.as_hex(), id.0],
            )
            .map_err(|e| map_constraint(e, &existing.remote_key, Some(&digest)))?;
            query_one(conn, "id = ?1", &id.0)?.ok_or(IndexError::NotFound(id))
        })
        .await
    }

    async fn remove(&self, id: FileId) -> Result<(), IndexError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
            Ok(())
        })
        .await
    }
}
