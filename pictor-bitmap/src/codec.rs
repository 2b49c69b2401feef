//! Codecs backed by the `image` crate.

use crate::{Bitmap, BitmapPool, PixelConfig};
use anyhow::{Context, Result};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use pictor_common::{Data, EncodeStrategy, Options, Resource};
use pictor_registry::{ResourceDecoder, ResourceEncoder, SourceEncoder};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decodes any still image format `image` recognizes into an RGBA [`Bitmap`].
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    pool: BitmapPool,
}

impl ImageDecoder {
    /// Decoder drawing pixel buffers from `pool`.
    pub fn new(pool: BitmapPool) -> Self {
        Self { pool }
    }
}

impl ResourceDecoder for ImageDecoder {
    fn handles(&self, data: &Data, _options: &Options) -> Result<bool> {
        let bytes = data.read_bytes()?;
        Ok(image::guess_format(&bytes).is_ok())
    }

    fn decode(
        &self,
        data: &Data,
        _width: u32,
        _height: u32,
        _options: &Options,
    ) -> Result<Option<Arc<Resource>>> {
        let bytes = data.read_bytes()?;
        let decoded = image::load_from_memory(&bytes).context("Failed to decode image")?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut pixels = self.pool.get_dirty(width, height, PixelConfig::Rgba8888);
        pixels.copy_from_slice(rgba.as_raw());
        let bitmap = Bitmap::from_pixels(width, height, PixelConfig::Rgba8888, pixels)?
            .with_pool(self.pool.clone());
        debug!("Decoded {width}x{height} bitmap from {} bytes", bytes.len());
        Ok(Some(Resource::new(bitmap)))
    }
}

/// Writes transformed bitmaps to the disk cache as PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngBitmapEncoder;

impl ResourceEncoder for PngBitmapEncoder {
    fn encode_strategy(&self, _options: &Options) -> EncodeStrategy {
        EncodeStrategy::Transformed
    }

    fn encode(&self, resource: &Resource, sink: &mut dyn Write, _options: &Options) -> bool {
        let Some(bitmap) = resource.downcast::<Bitmap>() else {
            warn!("PNG encoder received a {} resource", resource.tag());
            return false;
        };
        let color = match bitmap.config() {
            PixelConfig::Rgba8888 => ColorType::Rgba8,
            PixelConfig::Alpha8 => ColorType::L8,
        };
        match PngEncoder::new(sink).write_image(bitmap.pixels(), bitmap.width(), bitmap.height(), color) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to encode bitmap as PNG: {e}");
                false
            }
        }
    }
}

/// Writes original fetched bytes to the disk cache unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamEncoder;

impl SourceEncoder for StreamEncoder {
    fn encode(&self, data: &Data, sink: &mut dyn Write, _options: &Options) -> bool {
        let result = match data {
            Data::File(path) => std::fs::File::open(path).and_then(|mut f| io::copy(&mut f, sink)).map(|_| ()),
            other => other.read_bytes().and_then(|bytes| sink.write_all(&bytes)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write source data: {e}");
                false
            }
        }
    }
}
