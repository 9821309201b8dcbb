//! End-to-end flows through the library facade.

use shelfcache::content::{ContentHasher, DigestAlgorithm};
use shelfcache::error::{Error, ExitCode};
use shelfcache::index::{MemoryFileIndex, OwnerId};
use shelfcache::library::Library;
use shelfcache::storage::MemoryObjectStore;
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn setup() -> (TempDir, Arc<MemoryObjectStore>, Library) {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    let library = Library::from_parts(
        ContentHasher::new(DigestAlgorithm::Sha256),
        Arc::new(MemoryFileIndex::new()),
        store.clone(),
        &dir.path().join("cache"),
    )
    .unwrap();
    (dir, store, library)
}

#[tokio::test]
async fn test_duplicate_then_conflict() {
    let (dir, store, library) = setup();
    let owner = OwnerId::new("7").unwrap();
    let file_a = dir.path().join("a.epub");
    let file_b = dir.path().join("b.epub");
    fs::write(&file_a, b"content of A").unwrap();
    fs::write(&file_b, b"content of B").unwrap();

    // A to k1 succeeds
    library.register_upload(&owner, &file_a, "k1").await.unwrap();

    // A again to k2 is a content duplicate
    let err = library
        .register_upload(&owner, &file_a, "k2")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate { .. }));
    assert_eq!(err.exit_code(), ExitCode::Duplicate);
    assert!(store.object("k2").is_none());

    // B to k1 is a key conflict even though its digest is new
    let err = library
        .register_upload(&owner, &file_b, "k1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(err.exit_code(), ExitCode::Conflict);
    assert_eq!(store.object("k1").unwrap(), b"content of A");
    assert_eq!(store.put_calls(), 1);
}

#[tokio::test]
async fn test_materialize_then_hit() {
    let (dir, store, library) = setup();
    store.insert("books/x.epub", b"x".to_vec());
    let owner = OwnerId::new("42").unwrap();

    let path = library.materialize(&owner, "books/x.epub").await.unwrap();
    assert_eq!(path, dir.path().join("cache").join("42").join("x.epub"));
    assert_eq!(store.get_calls(), 1);

    let again = library.materialize(&owner, "books/x.epub").await.unwrap();
    assert_eq!(again, path);
    assert_eq!(store.get_calls(), 1);
}

#[tokio::test]
async fn test_evict_per_owner_and_globally() {
    let (_dir, store, library) = setup();
    store.insert("books/x.epub", b"xx".to_vec());
    let one = OwnerId::new("1").unwrap();
    let two = OwnerId::new("2").unwrap();
    let p1 = library.materialize(&one, "books/x.epub").await.unwrap();
    let p2 = library.materialize(&two, "books/x.epub").await.unwrap();

    library.evict(Some(&one)).await.unwrap();
    assert!(!p1.exists());
    assert!(p2.exists());

    library.evict(None).await.unwrap();
    assert!(!p2.exists());
    assert_eq!(library.usage(None).await.unwrap().files, 0);

    // Evicted files are fetched again on demand
    library.materialize(&one, "books/x.epub").await.unwrap();
    assert_eq!(store.get_calls(), 3);
}

#[tokio::test]
async fn test_upload_then_read_from_fresh_cache() {
    let (dir, _store, library) = setup();
    let owner = OwnerId::new("5").unwrap();
    let source = dir.path().join("Neuromancer.epub");
    fs::write(&source, b"the sky above the port").unwrap();

    let record = library.upload(&owner, &source).await.unwrap();
    let digest = library.digest(&source).await.unwrap();
    assert_eq!(record.digest, Some(digest));

    let bytes = library.read_owner_content(&owner).await.unwrap().unwrap();
    assert_eq!(bytes, b"the sky above the port");
    assert_eq!(library.cache_stats().misses, 1);
}
