//! Enums describing where data came from and how it is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a piece of data or a resource was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Local storage, assets or in-memory bytes.
    Local,
    /// A remote server.
    Remote,
    /// The disk cache holding original, unmodified bytes.
    DataDiskCache,
    /// The disk cache holding transformed, re-encoded resources.
    ResourceDiskCache,
    /// The active resources table or the memory cache.
    MemoryCache,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "LOCAL",
            Self::Remote => "REMOTE",
            Self::DataDiskCache => "DATA_DISK_CACHE",
            Self::ResourceDiskCache => "RESOURCE_DISK_CACHE",
            Self::MemoryCache => "MEMORY_CACHE",
        };
        f.write_str(name)
    }
}

/// What an encoder writes to the disk cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeStrategy {
    /// The original, unmodified data.
    Source,
    /// The decoded, transformed resource.
    Transformed,
    /// Nothing is written.
    None,
}

/// Scheduling priority of a load, ordered from most to least urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Run before anything else.
    Immediate,
    /// Run before normal work.
    High,
    /// The default.
    #[default]
    Normal,
    /// Run when nothing else is waiting.
    Low,
}
