//! Loaders for models that are already on this machine.

use anyhow::Context;
use bytes::Bytes;
use pictor_common::{Data, DataSource, Model, Options, Priority, SourceKey, TypeTag};
use pictor_registry::{DataCallback, DataFetcher, LoadData, ModelLoader};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Loads [`Model::File`] by reading the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl ModelLoader for FileLoader {
    fn handles(&self, model: &Model) -> bool {
        matches!(model, Model::File(_))
    }

    fn build_load_data(&self, model: &Model, _width: u32, _height: u32, _options: &Options) -> Option<LoadData> {
        let Model::File(path) = model else {
            return None;
        };
        let key = SourceKey::new(format!("file:{}", path.display()));
        Some(LoadData::new(key, Arc::new(FileFetcher { path: path.clone() })))
    }
}

struct FileFetcher {
    path: PathBuf,
}

impl DataFetcher for FileFetcher {
    fn load_data(&self, _priority: Priority, callback: DataCallback) {
        trace!("Reading {}", self.path.display());
        match std::fs::read(&self.path).with_context(|| format!("Failed to read {}", self.path.display())) {
            Ok(bytes) => callback.on_data_ready(Some(Data::Bytes(Bytes::from(bytes)))),
            Err(e) => callback.on_load_failed(e),
        }
    }

    fn data_tag(&self) -> TypeTag {
        TypeTag::BYTES
    }

    fn data_source(&self) -> DataSource {
        DataSource::Local
    }
}

/// Loads [`Model::Bytes`] by handing the bytes straight through.
///
/// The source key is a digest of the content, so identical byte buffers share
/// cache entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesLoader;

impl ModelLoader for BytesLoader {
    fn handles(&self, model: &Model) -> bool {
        matches!(model, Model::Bytes(_))
    }

    fn build_load_data(&self, model: &Model, _width: u32, _height: u32, _options: &Options) -> Option<LoadData> {
        let Model::Bytes(bytes) = model else {
            return None;
        };
        let digest = Sha256::digest(bytes);
        let mut key = String::from("bytes:");
        for byte in &digest[..16] {
            let _ = write!(key, "{byte:02x}");
        }
        Some(LoadData::new(SourceKey::new(key), Arc::new(BytesFetcher { bytes: bytes.clone() })))
    }
}

struct BytesFetcher {
    bytes: Bytes,
}

impl DataFetcher for BytesFetcher {
    fn load_data(&self, _priority: Priority, callback: DataCallback) {
        callback.on_data_ready(Some(Data::Bytes(self.bytes.clone())));
    }

    fn data_tag(&self) -> TypeTag {
        TypeTag::BYTES
    }

    fn data_source(&self) -> DataSource {
        DataSource::Local
    }
}
