//! Request models, signatures and options.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What a load request points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Model {
    /// A URL, fetched by whatever loader is registered for URLs.
    Url(String),
    /// A file on local storage.
    File(PathBuf),
    /// Encoded bytes already in memory.
    Bytes(Bytes),
    /// A named asset bundled with the application.
    Asset(String),
}

/// Discriminant of a [`Model`], used to look up model loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    /// [`Model::Url`]
    Url,
    /// [`Model::File`]
    File,
    /// [`Model::Bytes`]
    Bytes,
    /// [`Model::Asset`]
    Asset,
}

impl Model {
    /// Kind of this model.
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Url(_) => ModelKind::Url,
            Self::File(_) => ModelKind::File,
            Self::Bytes(_) => ModelKind::Bytes,
            Self::Asset(_) => ModelKind::Asset,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Bytes(bytes) => write!(f, "bytes[{}]", bytes.len()),
            Self::Asset(name) => write!(f, "asset:{name}"),
        }
    }
}

/// Identity of the original source of some data, such as a URL or a file path.
///
/// Source keys are produced by model loaders and are the stable part of both
/// disk cache keyspaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(Arc<str>);

impl SourceKey {
    /// Create a source key.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version marker mixed into every cache key so stale entries can be invalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    /// The signature used when the caller provides none.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a signature from any string, such as a file modification time or an ETag.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Signature text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Decoder and encoder options carried by a request.
///
/// Options are part of every request key and of the transformed disk cache key,
/// so they must be stable, ordered values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, returning the updated set.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set an option in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get an option value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get an option interpreted as a boolean, `false` when unset.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1"))
    }

    /// Iterate options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if no option is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
