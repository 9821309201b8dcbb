use shelfcache::cache::{CacheUsage, LocalFileCache};
use shelfcache::error::Error;
use shelfcache::index::OwnerId;
use shelfcache::storage::{DirObjectStore, MemoryObjectStore, ObjectStore};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).unwrap()
}

#[tokio::test]
async fn test_materialize_writes_under_owner_dir() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("books/x.epub", b"epub bytes".to_vec());
    let cache = LocalFileCache::new(dir.path(), store.clone()).unwrap();

    let path = cache.materialize(&owner("42"), "books/x.epub").await.unwrap();

    assert_eq!(path, dir.path().join("42").join("x.epub"));
    assert_eq!(fs::read(&path).unwrap(), b"epub bytes");
    assert_eq!(store.get_calls(), 1);
}

#[tokio::test]
async fn test_hit_performs_no_network_call() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("books/x.epub", b"v1".to_vec());
    let cache = LocalFileCache::new(dir.path(), store.clone()).unwrap();

    let first = cache.materialize(&owner("42"), "books/x.epub").await.unwrap();
    let (heads, gets) = (store.head_calls(), store.get_calls());
    let second = cache.materialize(&owner("42"), "books/x.epub").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.head_calls(), heads);
    assert_eq!(store.get_calls(), gets);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_cached_copy_is_not_revalidated() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("books/x.epub", b"old".to_vec());
    let cache = LocalFileCache::new(dir.path(), store.clone()).unwrap();
    cache.materialize(&owner("1"), "books/x.epub").await.unwrap();

    store.insert("books/x.epub", b"new".to_vec());
    let bytes = cache.read(&owner("1"), "books/x.epub").await.unwrap();
    assert_eq!(bytes, b"old");

    cache.evict(Some(&owner("1"))).await.unwrap();
    let bytes = cache.read(&owner("1"), "books/x.epub").await.unwrap();
    assert_eq!(bytes, b"new");
}

#[tokio::test]
async fn test_same_basename_different_owners() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("a/book.pdf", b"a".to_vec());
    store.insert("b/book.pdf", b"b".to_vec());
    let cache = LocalFileCache::new(dir.path(), store.clone()).unwrap();

    let pa = cache.materialize(&owner("1"), "a/book.pdf").await.unwrap();
    let pb = cache.materialize(&owner("2"), "b/book.pdf").await.unwrap();

    assert_ne!(pa, pb);
    assert_eq!(fs::read(pa).unwrap(), b"a");
    assert_eq!(fs::read(pb).unwrap(), b"b");
}

#[tokio::test]
async fn test_evict_owner_only_touches_that_owner() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("k/a.epub", vec![1u8; 10]);
    store.insert("k/b.epub", vec![2u8; 20]);
    let cache = LocalFileCache::new(dir.path(), store.clone()).unwrap();
    cache.materialize(&owner("1"), "k/a.epub").await.unwrap();
    cache.materialize(&owner("2"), "k/b.epub").await.unwrap();

    cache.evict(Some(&owner("1"))).await.unwrap();

    assert!(!dir.path().join("1").exists());
    assert!(dir.path().join("2").join("b.epub").exists());
    assert_eq!(
        cache.usage(None).await.unwrap(),
        CacheUsage { files: 1, bytes: 20 }
    );
    // Remote objects are untouched
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_evict_all_empties_root() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books"));
    store.insert("k/a.epub", b"a".to_vec());
    let root = dir.path().join("cache");
    let cache = LocalFileCache::new(&root, store.clone()).unwrap();
    cache.materialize(&owner("1"), "k/a.epub").await.unwrap();
    cache.materialize(&owner("2"), "k/a.epub").await.unwrap();

    cache.evict(None).await.unwrap();

    assert!(root.is_dir());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    assert!(store.head_object("k/a.epub").await.unwrap());
}

#[tokio::test]
async fn test_invalid_references_rejected() {
    let dir = tempdir().unwrap();
    let cache = LocalFileCache::new(dir.path(), Arc::new(MemoryObjectStore::default())).unwrap();

    for key in ["", "books/", "books/..", "books/."] {
        let err = cache.materialize(&owner("1"), key).await.unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)), "key {:?}", key);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_across_owners_fetch_once_each() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new("books").with_latency(Duration::from_millis(30)));
    store.insert("k/a.epub", vec![7u8; 4096]);
    let cache = Arc::new(LocalFileCache::new(dir.path(), store.clone()).unwrap());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..12 {
        let cache = cache.clone();
        let id = if i % 2 == 0 { "1" } else { "2" };
        tasks.spawn(async move { cache.materialize(&owner(id), "k/a.epub").await });
    }
    while let Some(result) = tasks.join_next().await {
        let path = result.unwrap().unwrap();
        assert_eq!(fs::metadata(path).unwrap().len(), 4096);
    }

    // One fetch per distinct cache path
    assert_eq!(store.get_calls(), 2);
}

#[tokio::test]
async fn test_materialize_from_directory_store() {
    let dir = tempdir().unwrap();
    let store = Arc::new(DirObjectStore::new(&dir.path().join("objects"), "books").unwrap());
    store
        .put_object("books/1700000000000_Dune.epub", b"spice".to_vec())
        .await
        .unwrap();
    let cache = LocalFileCache::new(dir.path().join("cache"), store).unwrap();

    let path = cache
        .materialize(&owner("9"), "books/1700000000000_Dune.epub")
        .await
        .unwrap();
    assert!(path.ends_with("9/1700000000000_Dune.epub"));
    assert_eq!(fs::read(path).unwrap(), b"spice");
}
