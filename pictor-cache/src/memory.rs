//! Size-bounded LRU cache of inactive resources.
//!
//! The cache never recycles anything itself: every operation that removes
//! entries to make room returns them, and the owner decides what to do with
//! them. It is NOT thread-safe; the engine only touches it from its control
//! thread.

use crate::stats::CacheStats;
use lru::LruCache;
use std::hash::Hash;

/// Accounted size of a cached value.
pub trait CacheWeight {
    /// Size in bytes.
    fn weight(&self) -> u64;
}

/// Memory pressure levels, from mild to severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrimLevel {
    /// The process is running and memory is getting low.
    RunningModerate = 5,
    /// The process is running and memory is low.
    RunningLow = 10,
    /// The process is running and memory is critically low.
    RunningCritical = 15,
    /// The user interface is no longer visible.
    UiHidden = 20,
    /// The process has moved to the background.
    Background = 40,
    /// The process is in the middle of the background kill list.
    Moderate = 60,
    /// The process is next to be killed.
    Complete = 80,
}

/// LRU cache bounded by the sum of entry weights.
pub struct MemoryCache<K: Hash + Eq + Clone, V: CacheWeight> {
    entries: LruCache<K, V>,
    current_size: u64,
    max_size: u64,
    initial_max_size: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: CacheWeight> MemoryCache<K, V> {
    /// Create a cache holding at most `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_size: 0,
            max_size,
            initial_max_size: max_size,
            stats: CacheStats::default(),
        }
    }

    /// Insert a value as the most recently used entry.
    ///
    /// Returns every entry that had to leave the cache: a replaced value for
    /// the same key, the least recently used entries pushed out by the new
    /// size, or the value itself when it alone exceeds the bound.
    #[must_use = "evicted entries must be recycled"]
    pub fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let weight = value.weight();
        if weight >= self.max_size {
            return vec![(key, value)];
        }
        self.stats.record_put();
        let mut evicted = Vec::new();
        self.current_size += weight;
        if let Some(old) = self.entries.put(key.clone(), value) {
            self.current_size -= old.weight();
            evicted.push((key, old));
        }
        evicted.extend(self.trim_to_size(self.max_size));
        evicted
    }

    /// Remove and return the value for `key`, counting a hit or a miss.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        match self.entries.pop(key) {
            Some(value) => {
                self.current_size -= value.weight();
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// True if `key` is cached. Does not change recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Remove everything.
    #[must_use = "evicted entries must be recycled"]
    pub fn clear_memory(&mut self) -> Vec<(K, V)> {
        self.trim_to_size(0)
    }

    /// Shrink in response to memory pressure.
    ///
    /// Background and worse clear the cache; a hidden UI or critically low
    /// memory halves it.
    #[must_use = "evicted entries must be recycled"]
    pub fn trim_memory(&mut self, level: TrimLevel) -> Vec<(K, V)> {
        if level >= TrimLevel::Background {
            self.clear_memory()
        } else if level >= TrimLevel::UiHidden || level == TrimLevel::RunningCritical {
            self.trim_to_size(self.max_size / 2)
        } else {
            Vec::new()
        }
    }

    /// Scale the bound relative to the size the cache was created with.
    #[must_use = "evicted entries must be recycled"]
    pub fn set_size_multiplier(&mut self, multiplier: f32) -> Vec<(K, V)> {
        let scaled = (self.initial_max_size as f64 * f64::from(multiplier.max(0.0))).round();
        self.max_size = scaled as u64;
        self.trim_to_size(self.max_size)
    }

    /// Current accounted size in bytes.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Maximum accounted size in bytes.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            size_bytes: self.current_size,
            max_size_bytes: self.max_size,
            ..self.stats
        }
    }

    fn trim_to_size(&mut self, size: u64) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.current_size > size {
            let Some((key, value)) = self.entries.pop_lru() else {
                break;
            };
            self.current_size -= value.weight();
            self.stats.record_eviction();
            evicted.push((key, value));
        }
        evicted
    }
}
