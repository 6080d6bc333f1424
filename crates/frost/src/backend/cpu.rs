//! Pure Rust separable convolution.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use super::{BlurBackend, BlurOutcome};
use crate::config::{Direction, Mode};
use crate::image::ImageBuffer;
use crate::kernel::Kernel1D;
use crate::scheduler::{BlurTask, ConcurrentTaskScheduler, Partition};
use crate::FrostResult;

// =============================================================================
// Pass task
// =============================================================================

/// One row band of a convolution pass.
///
/// Reads the whole (shared) source and writes only its own band of the
/// destination.
pub struct CpuPassTask<'a> {
    source: &'a [u8],
    band: &'a mut [u8],
    rows: Range<usize>,
    width: usize,
    height: usize,
    channels: usize,
    alpha: Option<usize>,
    kernel: &'a Kernel1D,
    partition: Partition,
}

impl BlurTask for CpuPassTask<'_> {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn run(self) -> FrostResult<()> {
        let stride = self.width * self.channels;
        let r = self.kernel.radius() as isize;
        let weights = self.kernel.weights();

        for (band_row, y) in self.rows.clone().enumerate() {
            let out = &mut self.band[band_row * stride..(band_row + 1) * stride];
            for x in 0..self.width {
                for ch in 0..self.channels {
                    let center = y * stride + x * self.channels + ch;
                    if self.alpha == Some(ch) {
                        out[x * self.channels + ch] = self.source[center];
                        continue;
                    }

                    let mut acc = 0.0f32;
                    for (k, &w) in weights.iter().enumerate() {
                        let offset = k as isize - r;
                        let idx = match self.partition.direction {
                            Direction::Horizontal => {
                                let sx = (x as isize + offset).clamp(0, self.width as isize - 1) as usize;
                                y * stride + sx * self.channels + ch
                            }
                            Direction::Vertical => {
                                let sy = (y as isize + offset).clamp(0, self.height as isize - 1) as usize;
                                sy * stride + x * self.channels + ch
                            }
                        };
                        acc += w * self.source[idx] as f32;
                    }
                    out[x * self.channels + ch] = acc.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    channels: usize,
    alpha: Option<usize>,
}

impl Layout {
    fn of(image: &ImageBuffer) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            channels: image.channels(),
            alpha: image.format().alpha_channel(),
        }
    }
}

// =============================================================================
// CpuBlur
// =============================================================================

/// CPU backend. Runs inline, or fans each pass out over the scheduler when
/// one is attached.
pub struct CpuBlur {
    mode: Mode,
    kernel: Kernel1D,
    scheduler: Option<Arc<ConcurrentTaskScheduler>>,
}

impl CpuBlur {
    pub fn new(mode: Mode, radius: u32, scheduler: Option<Arc<ConcurrentTaskScheduler>>) -> Self {
        Self {
            mode,
            kernel: Kernel1D::new(mode, radius),
            scheduler,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of bands each pass is split into.
    pub fn partitions(&self) -> usize {
        self.scheduler.as_ref().map_or(1, |s| s.workers())
    }

    fn run_pass(&self, direction: Direction, source: &[u8], dest: &mut [u8], layout: Layout) -> FrostResult<()> {
        let stride = layout.width * layout.channels;
        let count = self.partitions();

        let mut rest = dest;
        let mut tasks = Vec::with_capacity(count);
        for index in 0..count {
            let partition = Partition::new(count as u32, index as u32, direction);
            let rows = partition.range(layout.height);
            let (band, tail) = std::mem::take(&mut rest).split_at_mut(rows.len() * stride);
            rest = tail;
            tasks.push(CpuPassTask {
                source,
                band,
                rows,
                width: layout.width,
                height: layout.height,
                channels: layout.channels,
                alpha: layout.alpha,
                kernel: &self.kernel,
                partition,
            });
        }

        match &self.scheduler {
            Some(scheduler) => scheduler.invoke_all(tasks),
            None => tasks.into_iter().try_for_each(|task| task.run()),
        }
    }
}

impl BlurBackend for CpuBlur {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn blur(&self, image: &mut ImageBuffer) -> FrostResult<BlurOutcome> {
        trace!(w = image.width(), h = image.height(), mode = %self.mode, "CpuBlur::blur");
        let start = Instant::now();

        let layout = Layout::of(image);
        let mut scratch = vec![0u8; image.pixels().len()];
        self.run_pass(Direction::Horizontal, image.pixels(), &mut scratch, layout)?;
        // Horizontal pass has fully completed here; the vertical pass reads its output.
        self.run_pass(Direction::Vertical, &scratch, image.pixels_mut(), layout)?;

        debug!(
            partitions = self.partitions(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "cpu blur done"
        );
        Ok(BlurOutcome::Blurred)
    }
}
