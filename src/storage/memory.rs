//! In-memory object store with call accounting.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::{ObjectStore, StorageError};

/// A map-backed [`ObjectStore`].
///
/// Counts every call per operation so tests can assert, for example, that a
/// cache hit performed no fetch. [`set_available`](Self::set_available)
/// simulates an outage, [`set_reject_puts`](Self::set_reject_puts) a
/// read-only bucket, and [`with_latency`](Self::with_latency) slows down
/// fetches to widen race windows.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    reject_puts: AtomicBool,
    latency: Option<Duration>,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("books")
    }
}

impl MemoryObjectStore {
    /// Create an empty store for `bucket`.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            reject_puts: AtomicBool::new(false),
            latency: None,
            head_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every `get_object` by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed an object without counting a put.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.write_objects().insert(key.into(), body.into());
    }

    /// Current body under `key`, without counting a get.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.read_objects().get(key).cloned()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_objects().len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Toggle simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make `put_object` fail while reads keep working.
    pub fn set_reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::SeqCst);
    }

    /// Number of `head_object` calls so far.
    #[must_use]
    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_object` calls so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls so far.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unreachable(format!(
                "bucket {} is offline",
                self.bucket
            )))
        }
    }

    // A poisoned lock only means a test panicked mid-write; the map itself is
    // still usable.
    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_object(&self, key: &str) -> Result<bool, StorageError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.read_objects().contains_key(key))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.check_available()?;
        self.object(key).ok_or_else(|| StorageError::NotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unreachable(format!(
                "bucket {} rejected the write",
                self.bucket
            )));
        }
        self.write_objects().insert(key.to_string(), body);
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.check_available()?;
        Ok(format!(
            "memory://{}/{}?ttl={}",
            self.bucket,
            key,
            ttl.as_secs()
        ))
    }
}
