//! Decoded bitmap payload.
//!
//! # Memory Layout
//!
//! Pixels are stored in row-major order with no padding:
//!
//! ```text
//! Total size = W * H * B bytes
//! Pixel at (x, y) starts at offset: (y * W + x) * B
//! ```
//!
//! # Example
//!
//! ```
//! use pictor_bitmap::{Bitmap, PixelConfig};
//!
//! let bitmap = Bitmap::new(64, 32, PixelConfig::Rgba8888);
//! assert_eq!(bitmap.dimensions(), (64, 32));
//! assert_eq!(bitmap.pixels().len(), 64 * 32 * 4);
//! ```

use crate::{BitmapPool, PixelConfig};
use anyhow::{anyhow, ensure, Result};
use image::RgbaImage;
use pictor_common::{Payload, TypeTag};
use std::any::Any;

/// A decoded image that returns its buffer to a pool when recycled.
#[derive(Debug)]
pub struct Bitmap {
    width: u32,
    height: u32,
    config: PixelConfig,
    pixels: Vec<u8>,
    pool: Option<BitmapPool>,
}

impl Bitmap {
    /// A zeroed bitmap.
    pub fn new(width: u32, height: u32, config: PixelConfig) -> Self {
        Self { width, height, config, pixels: vec![0; config.byte_len(width, height)], pool: None }
    }

    /// Wrap existing pixels, which must match the shape exactly.
    pub fn from_pixels(width: u32, height: u32, config: PixelConfig, pixels: Vec<u8>) -> Result<Self> {
        let expected = config.byte_len(width, height);
        ensure!(
            pixels.len() == expected,
            "Pixel buffer of {} bytes does not match {width}x{height} {config:?} ({expected} bytes)",
            pixels.len()
        );
        Ok(Self { width, height, config, pixels, pool: None })
    }

    /// Wrap an RGBA image.
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height, config: PixelConfig::Rgba8888, pixels: image.into_raw(), pool: None }
    }

    /// Return the buffer to `pool` when this bitmap is recycled.
    #[must_use]
    pub fn with_pool(mut self, pool: BitmapPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel layout.
    pub fn config(&self) -> PixelConfig {
        self.config
    }

    /// Raw pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Raw pixels for writing.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Copy into an [`RgbaImage`] for processing with `image`.
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        let rgba = match self.config {
            PixelConfig::Rgba8888 => self.pixels.clone(),
            PixelConfig::Alpha8 => self.pixels.iter().flat_map(|&a| [0, 0, 0, a]).collect(),
        };
        RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| anyhow!("Bitmap buffer does not match {}x{}", self.width, self.height))
    }
}

impl Payload for Bitmap {
    fn tag(&self) -> TypeTag {
        TypeTag::BITMAP
    }

    fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    fn recycle(self: Box<Self>) {
        let Self { width, height, config, pixels, pool } = *self;
        if let Some(pool) = pool {
            pool.put(width, height, config, pixels);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pictor_common::Resource;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_pixels_checks_length() {
        assert!(Bitmap::from_pixels(2, 2, PixelConfig::Rgba8888, vec![0; 16]).is_ok());
        assert!(Bitmap::from_pixels(2, 2, PixelConfig::Rgba8888, vec![0; 15]).is_err());
    }

    #[test]
    fn test_recycle_returns_buffer_to_pool() {
        let pool = BitmapPool::new(1 << 20);
        let resource = Resource::new(Bitmap::new(8, 8, PixelConfig::Rgba8888).with_pool(pool.clone()));
        assert_eq!(resource.size(), 256);
        assert_eq!(resource.tag(), TypeTag::BITMAP);
        resource.recycle();
        assert_eq!(pool.size(), 256);
    }

    #[test]
    fn test_alpha_expands_to_rgba() {
        let bitmap = Bitmap::from_pixels(1, 1, PixelConfig::Alpha8, vec![9]).unwrap();
        assert_eq!(bitmap.to_rgba_image().unwrap().into_raw(), vec![0, 0, 0, 9]);
    }
}
