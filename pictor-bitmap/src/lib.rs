//! Bitmap payloads and the default decode pipeline for pictor.
//!
//! This crate provides:
//! - [`Bitmap`] - a decoded RGBA image implementing [`Payload`](pictor_common::Payload)
//! - [`BitmapPool`] - a size-bounded pool that recycled bitmaps return their buffers to
//! - [`ImageDecoder`], [`PngBitmapEncoder`], [`StreamEncoder`] - codecs backed by `image`
//! - [`FitCenter`], [`CenterCrop`] - resizing transformations
//! - [`FileLoader`], [`BytesLoader`] - local model loaders
//!
//! [`register_defaults`] wires all of them into a
//! [`Registry`](pictor_registry::Registry).

pub mod bitmap;
pub mod codec;
pub mod config;
pub mod loaders;
pub mod pool;
pub mod transform;

pub use bitmap::Bitmap;
pub use codec::{ImageDecoder, PngBitmapEncoder, StreamEncoder};
pub use config::PixelConfig;
pub use loaders::{BytesLoader, FileLoader};
pub use pool::BitmapPool;
pub use transform::{CenterCrop, FitCenter};

use pictor_common::{ModelKind, TypeTag};
use pictor_registry::{Registry, BUCKET_BITMAP};

/// Register the local loaders, the image decoder and both encoders.
pub fn register_defaults<'a>(registry: &'a mut Registry, pool: &BitmapPool) -> &'a mut Registry {
    registry
        .append_model_loader(ModelKind::File, TypeTag::BYTES, FileLoader)
        .append_model_loader(ModelKind::Bytes, TypeTag::BYTES, BytesLoader)
        .append_decoder_to_bucket(
            BUCKET_BITMAP,
            TypeTag::BYTES,
            TypeTag::BITMAP,
            ImageDecoder::new(pool.clone()),
        )
        .append_source_encoder(TypeTag::BYTES, StreamEncoder)
        .append_resource_encoder(TypeTag::BITMAP, PngBitmapEncoder)
}
