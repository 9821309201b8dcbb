use shelfcache::content::{ContentHasher, DigestAlgorithm};
use shelfcache::index::{
    FileId, FileIndex, IndexError, MemoryFileIndex, NewFileRecord, OwnerId, SqliteFileIndex,
};
use tempfile::tempdir;

fn new_record(owner: &str, key: &str, body: Option<&[u8]>) -> NewFileRecord {
    NewFileRecord {
        owner_id: OwnerId::new(owner).unwrap(),
        filename: key.rsplit('/').next().unwrap().to_string(),
        format: "epub".to_string(),
        remote_key: key.to_string(),
        size: body.map_or(0, |b| b.len() as u64),
        digest: body.map(|b| ContentHasher::new(DigestAlgorithm::Sha256).digest_bytes(b)),
    }
}

// Both implementations must agree on every rule the dedup gate relies on.
async fn exercise(index: &dyn FileIndex) {
    let a = index.create(new_record("1", "k/a", Some(b"a"))).await.unwrap();
    let legacy = index.create(new_record("1", "k/b", None)).await.unwrap();
    index.create(new_record("2", "k/c", None)).await.unwrap();

    assert!(matches!(
        index.create(new_record("3", "k/z", Some(b"a"))).await,
        Err(IndexError::DuplicateDigest { .. })
    ));
    assert!(matches!(
        index.create(new_record("3", "k/a", Some(b"zzz"))).await,
        Err(IndexError::DuplicateRemoteKey { .. })
    ));

    let found = index
        .find_by_digest(a.digest.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, a.id);
    assert_eq!(
        index.find_by_remote_key("k/b").await.unwrap().unwrap().id,
        legacy.id
    );

    let owner_one = index.files_for_owner(&OwnerId::new("1").unwrap()).await.unwrap();
    assert_eq!(
        owner_one.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![a.id, legacy.id]
    );
    assert_eq!(index.files_missing_digest().await.unwrap().len(), 2);

    let digest = ContentHasher::new(DigestAlgorithm::Sha256).digest_bytes(b"b");
    let updated = index.update_digest(legacy.id, &digest).await.unwrap();
    assert_eq!(updated.digest.as_ref(), Some(&digest));

    let other = ContentHasher::new(DigestAlgorithm::Sha256).digest_bytes(b"other");
    let unchanged = index.update_digest(legacy.id, &other).await.unwrap();
    assert_eq!(unchanged.digest, Some(digest));

    assert!(matches!(
        index.update_digest(FileId(999), &other).await,
        Err(IndexError::NotFound(FileId(999)))
    ));

    index.remove(a.id).await.unwrap();
    index.remove(a.id).await.unwrap();
    assert!(index.get(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_index_contract() {
    exercise(&MemoryFileIndex::new()).await;
}

#[tokio::test]
async fn test_sqlite_index_contract() {
    let dir = tempdir().unwrap();
    let index = SqliteFileIndex::open(&dir.path().join("lib.db"), DigestAlgorithm::Sha256).unwrap();
    exercise(&index).await;
}

#[tokio::test]
async fn test_reopen_with_other_algorithm_fails_until_migrated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lib.db");
    {
        let index = SqliteFileIndex::open(&path, DigestAlgorithm::Sha256).unwrap();
        index.create(new_record("1", "k/a", Some(b"a"))).await.unwrap();
    }

    assert!(matches!(
        SqliteFileIndex::open(&path, DigestAlgorithm::Blake3),
        Err(IndexError::AlgorithmMismatch {
            stored: DigestAlgorithm::Sha256,
            configured: DigestAlgorithm::Blake3
        })
    ));

    assert_eq!(
        SqliteFileIndex::migrate_algorithm(&path, DigestAlgorithm::Blake3).unwrap(),
        1
    );
    let index = SqliteFileIndex::open(&path, DigestAlgorithm::Blake3).unwrap();
    assert_eq!(index.files_missing_digest().await.unwrap().len(), 1);
}
