//! Per-key write locks for the disk cache.
//!
//! Writers of the same key are serialized; writers of different keys never
//! contend. Lock entries exist only while some thread holds or waits for
//! them.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct WriteLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteLock {
    fn lock(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn unlock(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

struct Entry {
    lock: Arc<WriteLock>,
    interested: usize,
}

/// Table of write locks keyed by safe disk cache key.
#[derive(Default)]
pub struct DiskCacheWriteLocker {
    locks: Mutex<HashMap<String, Entry>>,
}

impl DiskCacheWriteLocker {
    /// Create an empty locker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the write lock for `safe_key` is held.
    pub fn acquire(&self, safe_key: &str) -> WriteGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            let entry = locks.entry(safe_key.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(WriteLock::default()),
                interested: 0,
            });
            entry.interested += 1;
            Arc::clone(&entry.lock)
        };
        lock.lock();
        WriteGuard { locker: self, key: safe_key.to_string(), lock }
    }

    /// Number of keys with a holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        let remove = match locks.get_mut(key) {
            Some(entry) => {
                entry.interested -= 1;
                entry.interested == 0
            }
            None => false,
        };
        if remove {
            locks.remove(key);
        }
    }
}

/// Holds the write lock for one key until dropped.
pub struct WriteGuard<'a> {
    locker: &'a DiskCacheWriteLocker,
    key: String,
    lock: Arc<WriteLock>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.locker.release(&self.key);
        self.lock.unlock();
    }
}
