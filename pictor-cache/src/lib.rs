//! Cache tiers for the pictor engine.
//!
//! - [`MemoryCache`]: size-bounded LRU of inactive resources
//! - [`DiskLruCache`]: byte-bounded LRU of files, keyed by digests of
//!   [`DataCacheKey`] (original bytes) or [`ResourceCacheKey`] (transformed
//!   bytes)
//! - [`DiskCacheStrategy`]: the policy deciding what is written to and read
//!   from each disk keyspace
//!
//! Cache misses are never errors: lookups return `None` and the caller falls
//! through to the next tier.

pub mod disk;
pub mod keys;
pub mod memory;
pub mod stats;
pub mod strategy;
pub mod write_locker;

pub use disk::{DiskCache, DiskCacheAdapter, DiskCacheWriter, DiskLruCache};
pub use keys::{safe_key, DataCacheKey, DiskKey, ResourceCacheKey};
pub use memory::{CacheWeight, MemoryCache, TrimLevel};
pub use stats::CacheStats;
pub use strategy::DiskCacheStrategy;
pub use write_locker::{DiskCacheWriteLocker, WriteGuard};
