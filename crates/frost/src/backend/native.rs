//! Native backend: a C-ABI routine invoked once per partition.
//!
//! The routine receives a [`NativeBitmap`] describing the caller's pixel
//! memory and filters one partition of one pass in place. Partitions of the
//! horizontal pass are row bands, partitions of the vertical pass are column
//! bands, so concurrent calls of the same pass never touch the same bytes.
//!
//! Any routine with the [`NativeBlurFn`] signature can be plugged in through
//! the builder; [`frost_native_blur`] is the built-in fixed-point one.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace};

use super::{BlurBackend, BlurOutcome};
use crate::config::{Direction, Mode, MAX_RADIUS};
use crate::image::ImageBuffer;
use crate::kernel::Kernel1D;
use crate::scheduler::{band_range, BlurTask, ConcurrentTaskScheduler, Partition};
use crate::{BlurError, FrostResult};

// =============================================================================
// C ABI
// =============================================================================

/// Success.
pub const NATIVE_OK: i32 = 0;
/// Null pixels, empty image or bad channel layout.
pub const NATIVE_ERR_BITMAP: i32 = -1;
/// Unknown mode or direction code, or radius above [`MAX_RADIUS`].
pub const NATIVE_ERR_ARGUMENT: i32 = -2;
/// `index >= partitions` or zero partitions.
pub const NATIVE_ERR_PARTITION: i32 = -3;

/// Pixel memory handed across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeBitmap {
    /// Start of `width * height * channels` bytes, rows tightly packed.
    pub pixels: *mut u8,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Channel left untouched, or `-1` when every channel is filtered.
    pub alpha_channel: i32,
}

/// `(mode, bitmap, radius, partitions, index, direction) -> status`.
///
/// `mode` and `direction` use [`Mode::as_raw`] and [`Direction::as_raw`].
/// Zero means success, anything negative is an error.
pub type NativeBlurFn = unsafe extern "C" fn(
    mode: u32,
    bitmap: *const NativeBitmap,
    radius: u32,
    partitions: u32,
    index: u32,
    direction: u32,
) -> i32;

/// Built-in native routine: 16.16 fixed-point separable convolution.
///
/// # Safety
///
/// `bitmap` must point to a valid [`NativeBitmap`] whose `pixels` address
/// `width * height * channels` writable bytes. Calls running at the same time
/// on the same pixels must share one `direction` and use distinct `index`es.
pub unsafe extern "C" fn frost_native_blur(
    mode: u32,
    bitmap: *const NativeBitmap,
    radius: u32,
    partitions: u32,
    index: u32,
    direction: u32,
) -> i32 {
    if bitmap.is_null() {
        return NATIVE_ERR_BITMAP;
    }
    // SAFETY: non-null and valid per the contract above.
    let bitmap = unsafe { *bitmap };
    if bitmap.pixels.is_null() || bitmap.width == 0 || bitmap.height == 0 || bitmap.channels == 0 {
        return NATIVE_ERR_BITMAP;
    }
    if bitmap.alpha_channel >= bitmap.channels as i32 {
        return NATIVE_ERR_BITMAP;
    }
    let (Some(mode), Some(direction)) = (Mode::from_raw(mode), Direction::from_raw(direction)) else {
        return NATIVE_ERR_ARGUMENT;
    };
    if radius > MAX_RADIUS {
        return NATIVE_ERR_ARGUMENT;
    }
    if partitions == 0 || index >= partitions {
        return NATIVE_ERR_PARTITION;
    }

    let weights = Kernel1D::new(mode, radius).to_fixed();
    let lines = match direction {
        Direction::Horizontal => bitmap.height,
        Direction::Vertical => bitmap.width,
    };
    let band = band_range(lines as usize, partitions as usize, index as usize);

    // SAFETY: each line of the band is read and written only by this call.
    unsafe {
        for line in band {
            convolve_line(&bitmap, &weights, radius as usize, direction, line);
        }
    }
    NATIVE_OK
}

/// Filter one row (horizontal) or one column (vertical) in place.
///
/// The line is copied out first so every tap reads unfiltered values.
unsafe fn convolve_line(bitmap: &NativeBitmap, weights: &[i32], radius: usize, direction: Direction, line: usize) {
    let width = bitmap.width as usize;
    let height = bitmap.height as usize;
    let channels = bitmap.channels as usize;
    let stride = width * channels;

    let len = match direction {
        Direction::Horizontal => width,
        Direction::Vertical => height,
    };
    let offset_of = |i: usize| match direction {
        Direction::Horizontal => line * stride + i * channels,
        Direction::Vertical => i * stride + line * channels,
    };

    let mut copy = Vec::with_capacity(len * channels);
    for i in 0..len {
        let base = offset_of(i);
        for ch in 0..channels {
            // SAFETY: base + ch < width * height * channels.
            copy.push(unsafe { bitmap.pixels.add(base + ch).read() });
        }
    }

    let last = len as isize - 1;
    for i in 0..len {
        let base = offset_of(i);
        for ch in 0..channels {
            if bitmap.alpha_channel == ch as i32 {
                continue;
            }
            let mut acc: i64 = 0;
            for (k, &w) in weights.iter().enumerate() {
                let src = (i as isize + k as isize - radius as isize).clamp(0, last) as usize;
                acc += w as i64 * copy[src * channels + ch] as i64;
            }
            let value = ((acc + (1 << 15)) >> 16).clamp(0, 255) as u8;
            // SAFETY: as above; this line belongs to the calling partition.
            unsafe { bitmap.pixels.add(base + ch).write(value) };
        }
    }
}

// =============================================================================
// Partition task
// =============================================================================

/// Bitmap pointer shared by the tasks of one pass.
#[derive(Clone, Copy)]
struct SharedBitmap<'a> {
    bitmap: NativeBitmap,
    _pixels: PhantomData<&'a mut [u8]>,
}

// SAFETY: tasks of one pass write disjoint lines, and the pass is joined
// before the bitmap's borrow of the image ends.
unsafe impl Send for SharedBitmap<'_> {}
unsafe impl Sync for SharedBitmap<'_> {}

/// One native routine call.
pub struct NativeTask<'a> {
    bitmap: SharedBitmap<'a>,
    routine: NativeBlurFn,
    mode: Mode,
    radius: u32,
    partition: Partition,
}

impl BlurTask for NativeTask<'_> {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn run(self) -> FrostResult<()> {
        let p = self.partition;
        // SAFETY: the bitmap borrows a live image; partitions of a pass are disjoint.
        let code = unsafe {
            (self.routine)(
                self.mode.as_raw(),
                &self.bitmap.bitmap,
                self.radius,
                p.count,
                p.index,
                p.direction.as_raw(),
            )
        };
        if code == NATIVE_OK {
            Ok(())
        } else {
            error!(code, index = p.index, direction = ?p.direction, "native routine failed");
            Err(BlurError::BackendFailure(format!(
                "native routine returned {code} (partition {}/{}, {:?})",
                p.index, p.count, p.direction
            )))
        }
    }
}

// =============================================================================
// NativeBlur
// =============================================================================

/// Native backend.
pub struct NativeBlur {
    mode: Mode,
    radius: u32,
    routine: NativeBlurFn,
    scheduler: Option<Arc<ConcurrentTaskScheduler>>,
}

impl NativeBlur {
    pub fn new(
        mode: Mode,
        radius: u32,
        routine: NativeBlurFn,
        scheduler: Option<Arc<ConcurrentTaskScheduler>>,
    ) -> Self {
        Self {
            mode,
            radius,
            routine,
            scheduler,
        }
    }

    pub fn partitions(&self) -> u32 {
        self.scheduler.as_ref().map_or(1, |s| s.workers() as u32)
    }

    fn run_pass(&self, bitmap: SharedBitmap<'_>, direction: Direction) -> FrostResult<()> {
        let count = self.partitions();
        let tasks: Vec<NativeTask<'_>> = (0..count)
            .map(|index| NativeTask {
                bitmap,
                routine: self.routine,
                mode: self.mode,
                radius: self.radius,
                partition: Partition::new(count, index, direction),
            })
            .collect();

        match &self.scheduler {
            Some(scheduler) => scheduler.invoke_all(tasks),
            None => tasks.into_iter().try_for_each(|task| task.run()),
        }
    }
}

impl BlurBackend for NativeBlur {
    fn name(&self) -> &'static str {
        "native"
    }

    fn blur(&self, image: &mut ImageBuffer) -> FrostResult<BlurOutcome> {
        trace!(w = image.width(), h = image.height(), mode = %self.mode, "NativeBlur::blur");
        let start = Instant::now();

        let alpha_channel = image.format().alpha_channel().map_or(-1, |a| a as i32);
        let bitmap = SharedBitmap {
            bitmap: NativeBitmap {
                pixels: image.pixels_mut().as_mut_ptr(),
                width: image.width(),
                height: image.height(),
                channels: image.channels() as u32,
                alpha_channel,
            },
            _pixels: PhantomData,
        };

        self.run_pass(bitmap, Direction::Horizontal)?;
        self.run_pass(bitmap, Direction::Vertical)?;

        debug!(
            partitions = self.partitions(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "native blur done"
        );
        Ok(BlurOutcome::Blurred)
    }
}
