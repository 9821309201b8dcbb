//! Batch digest completion.
//!
//! Records registered before hashing existed have no digest and therefore
//! do not take part in duplicate detection. [`DedupGate::backfill_all`]
//! walks every such record, materializes its file through the local cache,
//! hashes it and stores the digest. One failing record does not stop the
//! pass; its outcome is reported and the next record is processed.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::DedupGate;
use crate::content::ContentDigest;
use crate::error::{Error, Result};
use crate::index::{FileId, OwnerId};
use crate::progress::ProgressCallback;

/// Phase name reported to the progress callback.
pub const BACKFILL_PHASE: &str = "backfill";

/// Options for a backfill pass.
#[derive(Clone, Default)]
pub struct BackfillConfig {
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for BackfillConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillConfig")
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl BackfillConfig {
    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Result of backfilling a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackfillStatus {
    /// The digest was computed and stored.
    Completed {
        /// The stored digest
        digest: ContentDigest,
    },
    /// Another record already holds the same content.
    Duplicate {
        /// Digest shared with the other record
        digest: ContentDigest,
        /// Key of the record holding the content, when known
        existing_key: Option<String>,
    },
    /// The file could not be fetched, hashed or recorded.
    Failed {
        /// Human-readable reason
        message: String,
    },
}

/// Outcome for one record of a backfill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillOutcome {
    /// Record id
    pub file_id: FileId,
    /// Owning book
    pub owner_id: OwnerId,
    /// File name of the record
    pub filename: String,
    /// What happened
    #[serde(flatten)]
    pub status: BackfillStatus,
}

/// Summary of a backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Number of records that lacked a digest when the pass started
    pub pending: usize,
    /// Per-record outcomes, in processing order
    pub outcomes: Vec<BackfillOutcome>,
    /// Whether the pass stopped early on a shutdown request
    pub interrupted: bool,
}

impl BackfillReport {
    /// Records whose digest was stored.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, BackfillStatus::Completed { .. }))
    }

    /// Records whose content duplicates another record.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.count(|s| matches!(s, BackfillStatus::Duplicate { .. }))
    }

    /// Records that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, BackfillStatus::Failed { .. }))
    }

    /// Records not processed because the pass was interrupted.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.pending.saturating_sub(self.outcomes.len())
    }

    fn count(&self, pred: impl Fn(&BackfillStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

impl DedupGate {
    /// Backfill the digest of every record that lacks one.
    ///
    /// Records are processed one at a time in id order. The shutdown flag is
    /// checked before each record; when set, the pass stops and the report
    /// is marked interrupted.
    ///
    /// # Errors
    ///
    /// Only a failure to list the pending records fails the whole pass.
    /// Per-record failures are reported as [`BackfillStatus::Failed`].
    pub async fn backfill_all(&self, config: &BackfillConfig) -> Result<BackfillReport> {
        let pending = self.index().files_missing_digest().await?;
        let mut report = BackfillReport {
            pending: pending.len(),
            ..BackfillReport::default()
        };
        log::info!("Backfilling digests for {} files", pending.len());

        if let Some(ref callback) = config.progress_callback {
            callback.on_phase_start(BACKFILL_PHASE, pending.len());
        }

        for (i, record) in pending.iter().enumerate() {
            if config.is_shutdown_requested() {
                log::info!("Backfill interrupted by shutdown signal");
                report.interrupted = true;
                break;
            }
            if let Some(ref callback) = config.progress_callback {
                callback.on_progress(i + 1, &record.filename);
            }

            let status = match self.backfill_digest(record).await {
                Ok(updated) => match updated.digest {
                    Some(digest) => BackfillStatus::Completed { digest },
                    None => BackfillStatus::Failed {
                        message: "digest missing after update".to_string(),
                    },
                },
                Err(Error::Duplicate {
                    digest,
                    existing_key,
                }) => {
                    log::warn!(
                        "{} ({}) duplicates {}",
                        record.filename,
                        record.remote_key,
                        existing_key.as_deref().unwrap_or("another file")
                    );
                    BackfillStatus::Duplicate {
                        digest,
                        existing_key,
                    }
                }
                Err(err) => {
                    log::warn!("Failed to backfill {}: {}", record.remote_key, err);
                    BackfillStatus::Failed {
                        message: err.to_string(),
                    }
                }
            };

            if let Some(ref callback) = config.progress_callback {
                callback.on_item_completed(record.size);
            }
            report.outcomes.push(BackfillOutcome {
                file_id: record.id,
                owner_id: record.owner_id.clone(),
                filename: record.filename.clone(),
                status,
            });
        }

        if let Some(ref callback) = config.progress_callback {
            callback.on_phase_end(BACKFILL_PHASE);
        }
        log::info!(
            "Backfill finished: {} completed, {} duplicates, {} failed, {} skipped",
            report.completed(),
            report.duplicates(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalFileCache;
    use crate::content::{ContentHasher, DigestAlgorithm};
    use crate::index::{FileIndex, MemoryFileIndex, NewFileRecord};
    use crate::storage::MemoryObjectStore;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressCallback for Recorder {
        fn on_phase_start(&self, phase: &str, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", phase, total));
        }

        fn on_progress(&self, current: usize, path: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("item {} {}", current, path));
        }

        fn on_phase_end(&self, phase: &str) {
            self.events.lock().unwrap().push(format!("end {}", phase));
        }
    }

    fn setup() -> (TempDir, Arc<MemoryObjectStore>, Arc<MemoryFileIndex>, DedupGate) {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new("books"));
        let index = Arc::new(MemoryFileIndex::new());
        let cache = Arc::new(LocalFileCache::new(dir.path().join("cache"), store.clone()).unwrap());
        let gate = DedupGate::new(
            ContentHasher::new(DigestAlgorithm::Sha256),
            index.clone(),
            store.clone(),
            cache,
        );
        (dir, store, index, gate)
    }

    async fn legacy(index: &MemoryFileIndex, owner: &str, key: &str) {
        index
            .create(NewFileRecord {
                owner_id: OwnerId::new(owner).unwrap(),
                filename: key.rsplit('/').next().unwrap().to_string(),
                format: "epub".to_string(),
                remote_key: key.to_string(),
                size: 3,
                digest: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_backfill_reports_each_record() {
        let (_dir, store, index, gate) = setup();
        store.insert("books/a.epub", b"aaa".to_vec());
        store.insert("books/b.epub", b"aaa".to_vec());
        legacy(&index, "1", "books/a.epub").await;
        legacy(&index, "2", "books/b.epub").await;
        legacy(&index, "3", "books/gone.epub").await;

        let report = gate.backfill_all(&BackfillConfig::default()).await.unwrap();

        assert_eq!(report.pending, 3);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.interrupted);
        assert!(matches!(
            &report.outcomes[1].status,
            BackfillStatus::Duplicate { existing_key: Some(k), .. } if k == "books/a.epub"
        ));
        assert_eq!(index.files_missing_digest().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_honors_shutdown() {
        let (_dir, store, index, gate) = setup();
        store.insert("books/a.epub", b"a".to_vec());
        legacy(&index, "1", "books/a.epub").await;

        let flag = Arc::new(AtomicBool::new(true));
        let config = BackfillConfig::default().with_shutdown_flag(flag);
        let report = gate.backfill_all(&config).await.unwrap();

        assert!(report.interrupted);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.skipped(), 1);
        assert_eq!(store.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_backfill_drives_progress() {
        let (_dir, store, index, gate) = setup();
        store.insert("books/a.epub", b"a".to_vec());
        legacy(&index, "1", "books/a.epub").await;

        let recorder = Arc::new(Recorder::default());
        let config = BackfillConfig::default().with_progress_callback(recorder.clone());
        gate.backfill_all(&config).await.unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["start backfill 1", "item 1 a.epub", "end backfill"]
        );
    }

    #[tokio::test]
    async fn test_report_serializes_status_inline() {
        let (_dir, store, index, gate) = setup();
        store.insert("books/a.epub", b"a".to_vec());
        legacy(&index, "1", "books/a.epub").await;

        let report = gate.backfill_all(&BackfillConfig::default()).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "completed");
        assert_eq!(json["outcomes"][0]["owner_id"], "1");
    }
}
