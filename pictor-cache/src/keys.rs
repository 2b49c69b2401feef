//! Disk cache keys.
//!
//! Two independent keyspaces exist: [`DataCacheKey`] for original bytes and
//! [`ResourceCacheKey`] for transformed, re-encoded bytes. Keys are reduced
//! to a SHA-256 hex digest before touching the filesystem.

use pictor_common::{Options, Signature, SourceKey, TypeTag};
use sha2::{Digest, Sha256};
use std::fmt;

/// A key into the disk cache.
pub trait DiskKey: fmt::Debug + Send + Sync {
    /// Feed every identifying field into `hasher`.
    fn update_digest(&self, hasher: &mut Sha256);
}

fn put_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Filesystem-safe name for `key`: the lowercase hex SHA-256 of its fields.
pub fn safe_key(key: &dyn DiskKey) -> String {
    let mut hasher = Sha256::new();
    key.update_digest(&mut hasher);
    format!("{:x}", hasher.finalize())
}

/// Key of original, unmodified source bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataCacheKey {
    /// Source identity.
    pub source_key: SourceKey,
    /// Request signature.
    pub signature: Signature,
}

impl DataCacheKey {
    /// Create a key.
    pub fn new(source_key: SourceKey, signature: Signature) -> Self {
        Self { source_key, signature }
    }
}

impl DiskKey for DataCacheKey {
    fn update_digest(&self, hasher: &mut Sha256) {
        hasher.update(b"data\0");
        put_str(hasher, self.source_key.as_str());
        put_str(hasher, self.signature.as_str());
    }
}

/// Key of a transformed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceCacheKey {
    /// Source identity.
    pub source_key: SourceKey,
    /// Request signature.
    pub signature: Signature,
    /// Target width.
    pub width: u32,
    /// Target height.
    pub height: u32,
    /// Id of the applied transformation.
    pub transformation: String,
    /// Tag of the decoded resource.
    pub resource_tag: TypeTag,
    /// Request options.
    pub options: Options,
}

impl DiskKey for ResourceCacheKey {
    fn update_digest(&self, hasher: &mut Sha256) {
        hasher.update(b"resource\0");
        put_str(hasher, self.source_key.as_str());
        put_str(hasher, self.signature.as_str());
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        put_str(hasher, &self.transformation);
        put_str(hasher, self.resource_tag.name());
        for (key, value) in self.options.iter() {
            put_str(hasher, key);
            put_str(hasher, value);
        }
    }
}
