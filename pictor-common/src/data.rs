//! Raw data produced by fetchers and consumed by decoders.

use crate::TypeTag;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Fetched, not yet decoded data.
#[derive(Clone)]
pub enum Data {
    /// Encoded bytes in memory.
    Bytes(Bytes),
    /// A file holding encoded bytes.
    File(PathBuf),
    /// Any other data type, identified by its tag.
    Custom {
        /// Registry tag of the value.
        tag: TypeTag,
        /// The value itself.
        value: Arc<dyn Any + Send + Sync>,
    },
}

impl Data {
    /// Registry tag of this data.
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Bytes(_) => TypeTag::BYTES,
            Self::File(_) => TypeTag::FILE,
            Self::Custom { tag, .. } => *tag,
        }
    }

    /// Read the data as encoded bytes.
    ///
    /// Files are read from disk on every call; custom data cannot be read as bytes.
    pub fn read_bytes(&self) -> io::Result<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(path) => std::fs::read(path).map(Bytes::from),
            Self::Custom { tag, .. } => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{tag} data cannot be read as bytes"),
            )),
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Custom { tag, .. } => f.debug_struct("Custom").field("tag", tag).finish(),
        }
    }
}
