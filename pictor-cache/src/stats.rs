//! Hit/miss accounting shared by the memory and disk caches.

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently held.
    pub entries: usize,
    /// Accounted size of held entries in bytes.
    pub size_bytes: u64,
    /// Maximum accounted size in bytes.
    pub max_size_bytes: u64,
    /// Lookups that found an entry.
    pub hit_count: u64,
    /// Lookups that found nothing.
    pub miss_count: u64,
    /// Entries inserted.
    pub put_count: u64,
    /// Entries removed to make room.
    pub eviction_count: u64,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn total_accesses(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Fraction of lookups that hit, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
    }

    pub(crate) fn record_miss(&mut self) {
        self.miss_count = self.miss_count.saturating_add(1);
    }

    pub(crate) fn record_put(&mut self) {
        self.put_count = self.put_count.saturating_add(1);
    }

    pub(crate) fn record_eviction(&mut self) {
        self.eviction_count = self.eviction_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.total_accesses(), 4);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
