//! Bilinear resampling for the sample-factor working copy.

use rayon::prelude::*;

use crate::image::ImageBuffer;
use crate::FrostResult;

/// Resize `src` to `width` x `height` with bilinear interpolation.
///
/// Sampling is pixel-center aligned. Returns a clone when the size is
/// unchanged.
pub fn resize_bilinear(src: &ImageBuffer, width: u32, height: u32) -> FrostResult<ImageBuffer> {
    if src.dimensions() == (width, height) {
        return Ok(src.clone());
    }

    let mut dst = ImageBuffer::new(width, height, src.format())?;
    let (sw, sh) = (src.width() as usize, src.height() as usize);
    let c = src.channels();
    let src_stride = src.stride();
    let dst_stride = dst.stride();
    let scale_x = sw as f32 / width as f32;
    let scale_y = sh as f32 / height as f32;
    let data = src.pixels();

    dst.pixels_mut()
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
            let y0 = (fy as usize).min(sh - 1);
            let y1 = (y0 + 1).min(sh - 1);
            let ty = fy - y0 as f32;

            for x in 0..width as usize {
                let fx = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
                let x0 = (fx as usize).min(sw - 1);
                let x1 = (x0 + 1).min(sw - 1);
                let tx = fx - x0 as f32;

                for ch in 0..c {
                    let p00 = data[y0 * src_stride + x0 * c + ch] as f32;
                    let p10 = data[y0 * src_stride + x1 * c + ch] as f32;
                    let p01 = data[y1 * src_stride + x0 * c + ch] as f32;
                    let p11 = data[y1 * src_stride + x1 * c + ch] as f32;

                    let top = p00 + (p10 - p00) * tx;
                    let bottom = p01 + (p11 - p01) * tx;
                    row[x * c + ch] = (top + (bottom - top) * ty).round().clamp(0.0, 255.0) as u8;
                }
            }
        });

    Ok(dst)
}
