//! Disk cache encoders.
//!
//! Encoders never fail loudly: returning `false` means the write was skipped
//! or failed and the cache entry is discarded.

use pictor_common::{Data, EncodeStrategy, Options, Resource};
use std::io::Write;

/// Writes original fetched data to the disk cache.
pub trait SourceEncoder: Send + Sync {
    /// Write `data` to `sink`.
    fn encode(&self, data: &Data, sink: &mut dyn Write, options: &Options) -> bool;
}

/// Writes a decoded resource to the disk cache.
pub trait ResourceEncoder: Send + Sync {
    /// Whether this encoder writes the original data or the transformed resource.
    fn encode_strategy(&self, options: &Options) -> EncodeStrategy;

    /// Write `resource` to `sink`.
    fn encode(&self, resource: &Resource, sink: &mut dyn Write, options: &Options) -> bool;
}
