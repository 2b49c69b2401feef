//! Byte-bounded LRU disk cache.
//!
//! Entries are plain files named by [`safe_key`] in a single directory. The
//! in-memory index is rebuilt from file modification times when the cache is
//! opened, so entries survive restarts. Writes go to a temporary file that is
//! renamed into place only when the writer reports success.

use crate::keys::{safe_key, DiskKey};
use crate::stats::CacheStats;
use crate::write_locker::DiskCacheWriteLocker;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Writes one cache entry.
pub trait DiskCacheWriter {
    /// Write the entry into `file`, returning `false` to discard it.
    fn write(&mut self, file: &mut File) -> bool;
}

impl<F: FnMut(&mut File) -> bool> DiskCacheWriter for F {
    fn write(&mut self, file: &mut File) -> bool {
        self(file)
    }
}

/// Contract of a disk cache.
///
/// Implementations never report errors: a failed read is a miss and a failed
/// write leaves no entry behind.
pub trait DiskCache: Send + Sync {
    /// Path of the entry for `key`, if present.
    fn get(&self, key: &dyn DiskKey) -> Option<PathBuf>;

    /// Write the entry for `key` unless it already exists.
    fn put(&self, key: &dyn DiskKey, writer: &mut dyn DiskCacheWriter);

    /// Remove the entry for `key`.
    fn delete(&self, key: &dyn DiskKey);

    /// Remove every entry.
    fn clear(&self);
}

/// Disk cache that stores nothing, used when disk caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskCacheAdapter;

impl DiskCache for DiskCacheAdapter {
    fn get(&self, _key: &dyn DiskKey) -> Option<PathBuf> {
        None
    }

    fn put(&self, _key: &dyn DiskKey, _writer: &mut dyn DiskCacheWriter) {}

    fn delete(&self, _key: &dyn DiskKey) {}

    fn clear(&self) {}
}

struct Index {
    entries: LruCache<String, u64>,
    size: u64,
    stats: CacheStats,
}

/// LRU disk cache bounded by total file size.
pub struct DiskLruCache {
    directory: PathBuf,
    max_size: u64,
    index: Mutex<Index>,
    writes: DiskCacheWriteLocker,
}

impl DiskLruCache {
    /// Open (or create) a cache in `directory` holding at most `max_size` bytes.
    ///
    /// Leftover temporary files from interrupted writes are removed.
    pub fn open(directory: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let mut found: Vec<(SystemTime, String, u64)> = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            if name.ends_with(".tmp") {
                let _ = fs::remove_file(entry.path());
                continue;
            }
            if !is_entry_name(&name) {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name, meta.len()));
        }
        found.sort();

        let mut index = Index { entries: LruCache::unbounded(), size: 0, stats: CacheStats::default() };
        for (_, name, len) in found {
            index.size += len;
            index.entries.put(name, len);
        }
        debug!(
            "Opened disk cache at {} with {} entries ({} bytes)",
            directory.display(),
            index.entries.len(),
            index.size
        );

        let cache = Self { directory, max_size, index: Mutex::new(index), writes: DiskCacheWriteLocker::new() };
        cache.trim(&mut cache.index.lock());
        Ok(cache)
    }

    /// Directory holding the entries.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Total size of all entries in bytes.
    pub fn size(&self) -> u64 {
        self.index.lock().size
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            entries: index.entries.len(),
            size_bytes: index.size,
            max_size_bytes: self.max_size,
            ..index.stats
        }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn trim(&self, index: &mut Index) {
        while index.size > self.max_size {
            let Some((name, len)) = index.entries.pop_lru() else {
                break;
            };
            index.size -= len;
            index.stats.record_eviction();
            if let Err(e) = fs::remove_file(self.entry_path(&name)) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to evict disk cache entry {name}: {e}");
                }
            }
        }
    }

    fn write_entry(&self, name: &str, writer: &mut dyn DiskCacheWriter) -> io::Result<Option<u64>> {
        let tmp = self.entry_path(&format!("{name}.tmp"));
        let written = {
            let mut file = File::create(&tmp)?;
            let ok = writer.write(&mut file);
            if ok {
                file.sync_all()?;
            }
            ok
        };
        if !written {
            fs::remove_file(&tmp)?;
            return Ok(None);
        }
        let path = self.entry_path(name);
        fs::rename(&tmp, &path)?;
        Ok(Some(fs::metadata(&path)?.len()))
    }
}

fn is_entry_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

impl DiskCache for DiskLruCache {
    fn get(&self, key: &dyn DiskKey) -> Option<PathBuf> {
        let name = safe_key(key);
        let mut index = self.index.lock();
        if let Some(&len) = index.entries.get(&name) {
            let path = self.entry_path(&name);
            if path.is_file() {
                index.stats.record_hit();
                return Some(path);
            }
            index.entries.pop(&name);
            index.size -= len;
        }
        index.stats.record_miss();
        None
    }

    fn put(&self, key: &dyn DiskKey, writer: &mut dyn DiskCacheWriter) {
        let name = safe_key(key);
        let _guard = self.writes.acquire(&name);
        if self.index.lock().entries.contains(&name) {
            return;
        }
        match self.write_entry(&name, writer) {
            Ok(Some(len)) => {
                let mut index = self.index.lock();
                index.size += len;
                index.entries.put(name, len);
                index.stats.record_put();
                self.trim(&mut index);
            }
            Ok(None) => debug!("Disk cache writer declined to write {key:?}"),
            Err(e) => {
                warn!("Failed to write disk cache entry for {key:?}: {e}");
                let _ = fs::remove_file(self.entry_path(&format!("{name}.tmp")));
            }
        }
    }

    fn delete(&self, key: &dyn DiskKey) {
        let name = safe_key(key);
        let mut index = self.index.lock();
        if let Some(len) = index.entries.pop(&name) {
            index.size -= len;
        }
        if let Err(e) = fs::remove_file(self.entry_path(&name)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to delete disk cache entry {name}: {e}");
            }
        }
    }

    fn clear(&self) {
        let mut index = self.index.lock();
        while let Some((name, _)) = index.entries.pop_lru() {
            let _ = fs::remove_file(self.entry_path(&name));
        }
        index.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DataCacheKey;
    use pictor_common::{Signature, SourceKey};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn key(source: &str) -> DataCacheKey {
        DataCacheKey::new(SourceKey::new(source), Signature::empty())
    }

    fn write_bytes(cache: &DiskLruCache, source: &str, bytes: &[u8]) {
        cache.put(&key(source), &mut |file: &mut File| file.write_all(bytes).is_ok());
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024).unwrap();
        assert!(cache.get(&key("a")).is_none());
        write_bytes(&cache, "a", b"hello");
        let path = cache.get(&key("a")).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"hello");
        assert_eq!(cache.size(), 5);
        let stats = cache.stats();
        assert_eq!((stats.hit_count, stats.miss_count, stats.put_count), (1, 1, 1));
    }

    #[test]
    fn test_declined_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024).unwrap();
        cache.put(&key("a"), &mut |file: &mut File| {
            let _ = file.write_all(b"partial");
            false
        });
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_second_writer_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskLruCache::open(dir.path(), 1024).unwrap());
        let writes = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let writes = Arc::clone(&writes);
                thread::spawn(move || {
                    cache.put(&key("shared"), &mut |file: &mut File| {
                        writes.fetch_add(1, Ordering::SeqCst);
                        file.write_all(b"once").is_ok()
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().put_count, 1);
    }

    #[test]
    fn test_evicts_least_recently_used_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 10).unwrap();
        write_bytes(&cache, "a", b"aaaa");
        write_bytes(&cache, "b", b"bbbb");
        assert!(cache.get(&key("a")).is_some());
        write_bytes(&cache, "c", b"cccc");
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert_eq!(cache.size(), 8);
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[test]
    fn test_reopen_restores_entries_and_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskLruCache::open(dir.path(), 1024).unwrap();
            write_bytes(&cache, "a", b"persisted");
        }
        fs::write(dir.path().join("deadbeef.tmp"), b"junk").unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024).unwrap();
        assert!(cache.get(&key("a")).is_some());
        assert_eq!(cache.size(), 9);
        assert!(!dir.path().join("deadbeef.tmp").exists());
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path(), 1024).unwrap();
        write_bytes(&cache, "a", b"a");
        write_bytes(&cache, "b", b"b");
        cache.delete(&key("a"));
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("b")).is_some());
        cache.clear();
        assert!(cache.get(&key("b")).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_adapter_stores_nothing() {
        let adapter = DiskCacheAdapter;
        adapter.put(&key("a"), &mut |_: &mut File| true);
        assert!(adapter.get(&key("a")).is_none());
    }
}
