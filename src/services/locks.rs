//! Per-key lock table.
//!
//! Each contended key (a `bucket/key` pair or a filesystem path) gets a
//! writer mutex that serializes mutations and a commit `RwLock` that readers
//! share while they pair metadata with an open file handle. Unrelated keys
//! never contend, and entries disappear once nobody holds them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Default)]
struct KeyLock {
    writer: Arc<Mutex<()>>,
    commit: Arc<RwLock<()>>,
}

/// Lock key of an object. The object store and the file browser share one
/// table so a browser read of `buckets/<bucket>/<key>` waits out a commit.
pub fn object_lock_key(bucket: &str, key: &str) -> String {
    format!("obj:{}/{}", bucket, key)
}

#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<DashMap<String, Arc<KeyLock>>>,
}

/// Held for the whole duration of a mutation on one key.
pub struct WriterGuard {
    table: KeyLocks,
    key: String,
    lock: Option<Arc<KeyLock>>,
    commit: Arc<RwLock<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl WriterGuard {
    /// Exclusive commit window: readers wait only while this is held.
    pub async fn commit(&self) -> OwnedRwLockWriteGuard<()> {
        self.commit.clone().write_owned().await
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.lock.take();
        self.table.release(&self.key);
    }
}

/// Shared commit access for readers.
pub struct ReaderGuard {
    table: KeyLocks,
    key: String,
    lock: Option<Arc<KeyLock>>,
    _guard: OwnedRwLockReadGuard<()>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.lock.take();
        self.table.release(&self.key);
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<KeyLock> {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyLock::default()))
            .clone()
    }

    /// Drop the table entry when the last guard for it goes away.
    fn release(&self, key: &str) {
        self.inner
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn writer(&self, key: &str) -> WriterGuard {
        let lock = self.entry(key);
        let guard = lock.writer.clone().lock_owned().await;
        WriterGuard {
            table: self.clone(),
            key: key.to_string(),
            commit: lock.commit.clone(),
            lock: Some(lock),
            _guard: guard,
        }
    }

    pub async fn reader(&self, key: &str) -> ReaderGuard {
        let lock = self.entry(key);
        let guard = lock.commit.clone().read_owned().await;
        ReaderGuard {
            table: self.clone(),
            key: key.to_string(),
            lock: Some(lock),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }
}
