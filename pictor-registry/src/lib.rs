//! Capability registry for the pictor decode pipeline.
//!
//! This crate defines the collaborator traits the engine drives and the
//! [`Registry`] that indexes them by [`TypeTag`] edges:
//!
//! - [`ModelLoader`] / [`DataFetcher`]: model → raw [`Data`]
//! - [`ResourceDecoder`]: `(data tag, resource tag)` edge
//! - [`ResourceTranscoder`]: `(resource tag, transcode tag)` edge
//! - [`Transformation`]: resource → resource of the same tag
//! - [`SourceEncoder`] / [`ResourceEncoder`]: persistence to the disk cache
//!
//! Path resolution turns a `(data, resource, transcode)` triple into a
//! [`LoadPath`]: every viable `(decoders, transcoder)` pair, in decoder bucket
//! order. Results are memoized, including the absence of a path.
//!
//! # Example
//!
//! ```
//! use anyhow::Result;
//! use pictor_common::{Data, Options, Resource, TypeTag};
//! use pictor_registry::{Registry, ResourceDecoder, BUCKET_BITMAP};
//! use std::sync::Arc;
//!
//! struct NoopDecoder;
//!
//! impl ResourceDecoder for NoopDecoder {
//!     fn handles(&self, _data: &Data, _options: &Options) -> Result<bool> {
//!         Ok(false)
//!     }
//!
//!     fn decode(
//!         &self,
//!         _data: &Data,
//!         _width: u32,
//!         _height: u32,
//!         _options: &Options,
//!     ) -> Result<Option<Arc<Resource>>> {
//!         Ok(None)
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.append_decoder_to_bucket(BUCKET_BITMAP, TypeTag::BYTES, TypeTag::BITMAP, NoopDecoder);
//! assert!(registry.load_path(TypeTag::BYTES, TypeTag::ANY, TypeTag::BITMAP).is_some());
//! assert!(registry.load_path(TypeTag::FILE, TypeTag::ANY, TypeTag::BITMAP).is_none());
//! ```

pub mod decoder;
pub mod encoder;
pub mod loader;
pub mod path;
pub mod registry;

pub use decoder::{
    ResourceDecoder, ResourceTranscoder, Transformation, UnitTranscoder, UnitTransformation,
};
pub use encoder::{ResourceEncoder, SourceEncoder};
pub use loader::{DataCallback, DataFetcher, FetchTarget, LoadData, ModelLoader};
pub use path::{DecodePath, LoadPath, PathError};
pub use registry::Registry;

pub use pictor_common::{Data, TypeTag};

/// Decoder bucket for animated formats.
pub const BUCKET_ANIMATED: &str = "Animated";
/// Decoder bucket for still images.
pub const BUCKET_BITMAP: &str = "Bitmap";
/// Decoder bucket for displayable wrappers around still images.
pub const BUCKET_DRAWABLE: &str = "Drawable";
/// Bucket tried before every other bucket.
pub const BUCKET_PREPEND_ALL: &str = "prepend_all";
/// Bucket tried after every other bucket.
pub const BUCKET_APPEND_ALL: &str = "append_all";
