//! CLI command implementations

pub mod backends;
pub mod blur;

use anyhow::{Context, Result};
use frost::{ImageBuffer, PixelFormat};
use std::path::Path;

/// Load an image file as RGBA8.
pub fn load_image(path: &Path) -> Result<ImageBuffer> {
    let rgba = image::open(path)
        .with_context(|| format!("Failed to load: {}", path.display()))?
        .to_rgba8();
    let (w, h) = rgba.dimensions();
    ImageBuffer::from_raw(rgba.into_raw(), w, h, PixelFormat::Rgba8)
        .with_context(|| format!("Failed to wrap pixels of {}", path.display()))
}

/// Save an RGBA8 image; the format follows the file extension.
pub fn save_image(path: &Path, buffer: ImageBuffer) -> Result<()> {
    let (w, h) = buffer.dimensions();
    let rgba = image::RgbaImage::from_raw(w, h, buffer.into_raw())
        .context("Blurred buffer does not match its dimensions")?;
    rgba.save(path)
        .with_context(|| format!("Failed to save: {}", path.display()))
}
