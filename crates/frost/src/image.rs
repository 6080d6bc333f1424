//! Owned 8-bit image buffers.

use crate::{BlurError, FrostResult};

/// Pixel layout of an [`ImageBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 4 channels, alpha last.
    #[default]
    Rgba8,
    /// 4 channels, alpha last.
    Bgra8,
    /// Single luminance channel.
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn channels(&self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Gray8 => 1,
        }
    }

    /// Index of the alpha channel inside a pixel, if any.
    pub fn alpha_channel(&self) -> Option<usize> {
        match self {
            Self::Rgba8 | Self::Bgra8 => Some(3),
            Self::Gray8 => None,
        }
    }
}

/// Image owned by the caller and lent to the engine for in-place filtering.
#[derive(Clone)]
pub struct ImageBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    recycled: bool,
}

impl ImageBuffer {
    /// Create a zeroed image.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> FrostResult<Self> {
        let size = Self::byte_len(width, height, format)?;
        Ok(Self {
            pixels: vec![0; size],
            width,
            height,
            format,
            recycled: false,
        })
    }

    /// Wrap existing pixel data.
    pub fn from_raw(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> FrostResult<Self> {
        let expected = Self::byte_len(width, height, format)?;
        if pixels.len() != expected {
            return Err(BlurError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels, width, height, format, recycled: false })
    }

    /// Create an image where every pixel equals `pixel`.
    pub fn filled(width: u32, height: u32, format: PixelFormat, pixel: &[u8]) -> FrostResult<Self> {
        if pixel.len() != format.channels() {
            return Err(BlurError::BufferSizeMismatch {
                expected: format.channels(),
                actual: pixel.len(),
            });
        }
        let mut image = Self::new(width, height, format)?;
        for px in image.pixels.chunks_exact_mut(pixel.len()) {
            px.copy_from_slice(pixel);
        }
        Ok(image)
    }

    fn byte_len(width: u32, height: u32, format: PixelFormat) -> FrostResult<usize> {
        if width == 0 || height == 0 {
            return Err(BlurError::InvalidDimensions(width, height));
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or(BlurError::InvalidDimensions(width, height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.channels()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Channels of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels();
        let offset = y as usize * self.stride() + x as usize * c;
        &self.pixels[offset..offset + c]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: &[u8]) {
        let c = self.channels();
        let offset = y as usize * self.stride() + x as usize * c;
        self.pixels[offset..offset + c].copy_from_slice(value);
    }

    /// Release the pixel storage. Any later blur request with this buffer
    /// fails with [`BlurError::RecycledInput`].
    pub fn recycle(&mut self) {
        self.pixels = Vec::new();
        self.recycled = true;
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    /// Copy out the sub-image starting at `(x, y)` and extending to the
    /// bottom-right corner.
    pub fn crop_from(&self, x: u32, y: u32) -> FrostResult<Self> {
        if x >= self.width || y >= self.height {
            return Err(BlurError::InvalidConfiguration(format!(
                "translate ({x}, {y}) lies outside {}x{} image",
                self.width, self.height
            )));
        }
        let w = self.width - x;
        let h = self.height - y;
        let c = self.channels();
        let mut pixels = Vec::with_capacity(w as usize * h as usize * c);
        for row in self.pixels.chunks_exact(self.stride()).skip(y as usize) {
            pixels.extend_from_slice(&row[x as usize * c..]);
        }
        Self::from_raw(pixels, w, h, self.format)
    }

    /// Dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Consume the image and return its pixel data.
    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("recycled", &self.recycled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_size_check() {
        let err = ImageBuffer::from_raw(vec![0; 10], 2, 2, PixelFormat::Rgba8).unwrap_err();
        assert!(matches!(err, BlurError::BufferSizeMismatch { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(
            ImageBuffer::new(0, 4, PixelFormat::Gray8),
            Err(BlurError::InvalidDimensions(0, 4))
        ));
    }

    #[test]
    fn test_recycle() {
        let mut img = ImageBuffer::new(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(!img.is_recycled());
        img.recycle();
        assert!(img.is_recycled());
        assert!(img.pixels().is_empty());
    }

    #[test]
    fn test_crop_from() {
        let mut img = ImageBuffer::new(4, 3, PixelFormat::Gray8).unwrap();
        for (i, v) in img.pixels_mut().iter_mut().enumerate() {
            *v = i as u8;
        }
        let crop = img.crop_from(1, 1).unwrap();
        assert_eq!(crop.dimensions(), (3, 2));
        assert_eq!(crop.pixels(), &[5, 6, 7, 9, 10, 11]);
        assert!(img.crop_from(4, 0).is_err());
    }
}
