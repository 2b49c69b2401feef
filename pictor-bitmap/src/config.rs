//! Pixel layouts of decoded bitmaps.

/// How a bitmap stores its pixels.
///
/// Pixels are stored row-major with no padding, so a bitmap of width W,
/// height H and B bytes per pixel always holds exactly `W * H * B` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelConfig {
    /// 8 bits per channel, red, green, blue, alpha.
    #[default]
    Rgba8888,
    /// Single 8-bit alpha (or luminance) channel.
    Alpha8,
}

impl PixelConfig {
    /// Bytes used by one pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Alpha8 => 1,
        }
    }

    /// Bytes needed for a `width` x `height` bitmap.
    pub const fn byte_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len() {
        assert_eq!(PixelConfig::Rgba8888.byte_len(10, 20), 800);
        assert_eq!(PixelConfig::Alpha8.byte_len(10, 20), 200);
        assert_eq!(PixelConfig::default(), PixelConfig::Rgba8888);
    }
}
