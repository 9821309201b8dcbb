use shelfcache::cache::LocalFileCache;
use shelfcache::content::{ContentHasher, DigestAlgorithm};
use shelfcache::dedup::{BackfillConfig, BackfillStatus, DedupGate};
use shelfcache::error::Error;
use shelfcache::index::{FileIndex, NewFileRecord, OwnerId, SqliteFileIndex};
use shelfcache::storage::MemoryObjectStore;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Harness {
    dir: TempDir,
    store: Arc<MemoryObjectStore>,
    index: Arc<SqliteFileIndex>,
    gate: Arc<DedupGate>,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    let index = Arc::new(
        SqliteFileIndex::open(&dir.path().join("library.db"), DigestAlgorithm::Sha256).unwrap(),
    );
    let cache = Arc::new(LocalFileCache::new(dir.path().join("cache"), store.clone()).unwrap());
    let gate = Arc::new(DedupGate::new(
        ContentHasher::new(DigestAlgorithm::Sha256),
        index.clone(),
        store.clone(),
        cache,
    ));
    Harness {
        dir,
        store,
        index,
        gate,
    }
}

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).unwrap()
}

impl Harness {
    fn write(&self, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }
}

#[tokio::test]
async fn test_renamed_copy_is_duplicate() {
    let h = harness();
    let original = h.write("Dune.epub", b"the spice must flow");
    let renamed = h.write("dune (1).epub", b"the spice must flow");

    h.gate
        .register_upload(&owner("1"), &original, "books/1_Dune.epub")
        .await
        .unwrap();
    let err = h
        .gate
        .register_upload(&owner("1"), &renamed, "books/2_dune (1).epub")
        .await
        .unwrap_err();

    match err {
        Error::Duplicate {
            existing_key: Some(key),
            ..
        } => assert_eq!(key, "books/1_Dune.epub"),
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert_eq!(h.store.put_calls(), 1);
}

#[tokio::test]
async fn test_conflict_regardless_of_digest() {
    let h = harness();
    h.store.insert("books/taken.pdf", b"unrelated".to_vec());
    let source = h.write("new.pdf", b"brand new");

    let err = h
        .gate
        .register_upload(&owner("1"), &source, "books/taken.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(h.store.put_calls(), 0);
    assert!(h.index.files_for_owner(&owner("1")).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_uploads_admit_one() {
    let h = harness();
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let source = h.write(&format!("copy{}.epub", i), b"same content everywhere");
        let gate = h.gate.clone();
        tasks.spawn(async move {
            gate.register_upload(&owner("1"), &source, &format!("books/{}.epub", i))
                .await
        });
    }

    let mut admitted = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(Error::Duplicate { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(h.index.files_for_owner(&owner("1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_backfill_never_overwrites_upload_digest() {
    let h = harness();
    let source = h.write("a.epub", b"uploaded normally");
    let record = h
        .gate
        .register_upload(&owner("1"), &source, "books/a.epub")
        .await
        .unwrap();

    // Remote bytes changed behind our back; backfill must not touch the digest
    h.store.insert("books/a.epub", b"tampered".to_vec());
    let again = h.gate.backfill_digest(&record).await.unwrap();
    assert_eq!(again.digest, record.digest);
}

#[tokio::test]
async fn test_backfill_all_over_sqlite() {
    let h = harness();
    for (i, body) in [&b"one"[..], b"two", b"one"].iter().enumerate() {
        let key = format!("legacy/{}.epub", i);
        h.store.insert(key.clone(), body.to_vec());
        h.index
            .create(NewFileRecord {
                owner_id: owner(&i.to_string()),
                filename: format!("{}.epub", i),
                format: "epub".to_string(),
                remote_key: key,
                size: body.len() as u64,
                digest: None,
            })
            .await
            .unwrap();
    }

    let report = h.gate.backfill_all(&BackfillConfig::default()).await.unwrap();

    assert_eq!(report.completed(), 2);
    assert_eq!(report.duplicates(), 1);
    assert!(matches!(
        &report.outcomes[2].status,
        BackfillStatus::Duplicate { existing_key: Some(k), .. } if k == "legacy/0.epub"
    ));

    // Backfilled digests now guard new uploads
    let source = h.write("fresh.epub", b"two");
    let err = h
        .gate
        .register_upload(&owner("9"), &source, "books/fresh.epub")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate { .. }));
}

#[tokio::test]
async fn test_backfill_interrupted_before_start() {
    let h = harness();
    h.index
        .create(NewFileRecord {
            owner_id: owner("1"),
            filename: "x.epub".to_string(),
            format: "epub".to_string(),
            remote_key: "legacy/x.epub".to_string(),
            size: 1,
            digest: None,
        })
        .await
        .unwrap();

    let config = BackfillConfig::default().with_shutdown_flag(Arc::new(AtomicBool::new(true)));
    let report = h.gate.backfill_all(&config).await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.skipped(), 1);
}
