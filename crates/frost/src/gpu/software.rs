//! CPU emulation of an offscreen device.
//!
//! Surfaces and textures are RGBA8 byte arrays. `draw` runs the blur fragment
//! program once per output fragment, in parallel over rows. Creation and draw
//! failures can be switched on to exercise the backend's error paths.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use rayon::prelude::*;
use tracing::trace;

use super::{from_rgba, to_rgba, BlurProgram, DrawInput, GpuError, GpuResult, OffscreenDevice, Size};
use crate::config::Direction;
use crate::image::ImageBuffer;
use crate::kernel::tap_weight;

#[derive(Default)]
struct Faults {
    context: AtomicBool,
    surface: AtomicBool,
    texture: AtomicBool,
    draw: AtomicBool,
}

#[derive(Default)]
struct Counters {
    contexts_created: AtomicUsize,
    contexts_destroyed: AtomicUsize,
    surfaces_created: AtomicUsize,
    surfaces_destroyed: AtomicUsize,
    textures_created: AtomicUsize,
    textures_destroyed: AtomicUsize,
    draws: AtomicUsize,
}

#[derive(Default)]
struct Shared {
    faults: Faults,
    counters: Counters,
    next_id: AtomicU64,
}

/// Resource counters of a [`SoftwareDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    pub surfaces_created: usize,
    pub surfaces_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub draws: usize,
}

/// Software offscreen device. Clones share counters and fault switches.
#[derive(Clone, Default)]
pub struct SoftwareDevice {
    shared: Arc<Shared>,
}

pub struct SoftwareContext {
    id: u64,
    owner: ThreadId,
    current: Option<u64>,
}

pub struct SoftwareSurface {
    id: u64,
    size: Size,
    rgba: Vec<u8>,
}

pub struct SoftwareTexture {
    size: Size,
    rgba: Vec<u8>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_context_creation(&self, fail: bool) {
        self.shared.faults.context.store(fail, Ordering::SeqCst);
    }

    pub fn fail_surface_creation(&self, fail: bool) {
        self.shared.faults.surface.store(fail, Ordering::SeqCst);
    }

    pub fn fail_texture_creation(&self, fail: bool) {
        self.shared.faults.texture.store(fail, Ordering::SeqCst);
    }

    pub fn fail_draw(&self, fail: bool) {
        self.shared.faults.draw.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SoftwareStats {
        let c = &self.shared.counters;
        SoftwareStats {
            contexts_created: c.contexts_created.load(Ordering::SeqCst),
            contexts_destroyed: c.contexts_destroyed.load(Ordering::SeqCst),
            surfaces_created: c.surfaces_created.load(Ordering::SeqCst),
            surfaces_destroyed: c.surfaces_destroyed.load(Ordering::SeqCst),
            textures_created: c.textures_created.load(Ordering::SeqCst),
            textures_destroyed: c.textures_destroyed.load(Ordering::SeqCst),
            draws: c.draws.load(Ordering::SeqCst),
        }
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_owner(context: &SoftwareContext) -> GpuResult<()> {
        if context.owner == thread::current().id() {
            Ok(())
        } else {
            Err(GpuError::WrongThread)
        }
    }
}

impl std::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice").field("stats", &self.stats()).finish()
    }
}

impl SoftwareContext {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl OffscreenDevice for SoftwareDevice {
    type Context = SoftwareContext;
    type Surface = SoftwareSurface;
    type Texture = SoftwareTexture;

    fn name(&self) -> &'static str {
        "software"
    }

    fn create_context(&self) -> GpuResult<SoftwareContext> {
        if self.shared.faults.context.load(Ordering::SeqCst) {
            return Err(GpuError::ContextCreation("software context creation disabled".into()));
        }
        self.shared.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(SoftwareContext {
            id: self.next_id(),
            owner: thread::current().id(),
            current: None,
        })
    }

    fn destroy_context(&self, _context: SoftwareContext) {
        self.shared.counters.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn create_surface(&self, _context: &SoftwareContext, size: Size) -> GpuResult<SoftwareSurface> {
        if self.shared.faults.surface.load(Ordering::SeqCst) {
            return Err(GpuError::SurfaceCreation("software surface creation disabled".into()));
        }
        self.shared.counters.surfaces_created.fetch_add(1, Ordering::SeqCst);
        Ok(SoftwareSurface {
            id: self.next_id(),
            size,
            rgba: vec![0; size.width as usize * size.height as usize * 4],
        })
    }

    fn destroy_surface(&self, _surface: SoftwareSurface) {
        self.shared.counters.surfaces_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn surface_size(&self, surface: &SoftwareSurface) -> Size {
        surface.size
    }

    fn create_texture(&self, _context: &SoftwareContext, size: Size) -> GpuResult<SoftwareTexture> {
        if self.shared.faults.texture.load(Ordering::SeqCst) {
            return Err(GpuError::TextureCreation("software texture creation disabled".into()));
        }
        self.shared.counters.textures_created.fetch_add(1, Ordering::SeqCst);
        Ok(SoftwareTexture {
            size,
            rgba: vec![0; size.width as usize * size.height as usize * 4],
        })
    }

    fn destroy_texture(&self, _texture: SoftwareTexture) {
        self.shared.counters.textures_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn texture_size(&self, texture: &SoftwareTexture) -> Size {
        texture.size
    }

    fn make_current(&self, context: &mut SoftwareContext, surface: &SoftwareSurface) -> GpuResult<()> {
        Self::check_owner(context)?;
        context.current = Some(surface.id);
        Ok(())
    }

    fn release_current(&self, context: &mut SoftwareContext) {
        context.current = None;
    }

    fn upload(&self, context: &mut SoftwareContext, texture: &mut SoftwareTexture, image: &ImageBuffer) -> GpuResult<()> {
        Self::check_owner(context)?;
        if texture.size != Size::of(image) {
            return Err(GpuError::OperationFailed(format!(
                "texture {:?} cannot hold {}x{} image",
                texture.size,
                image.width(),
                image.height()
            )));
        }
        texture.rgba = to_rgba(image);
        Ok(())
    }

    fn draw(
        &self,
        context: &mut SoftwareContext,
        program: BlurProgram,
        input: DrawInput<'_, Self>,
        target: &mut SoftwareSurface,
    ) -> GpuResult<()> {
        Self::check_owner(context)?;
        if context.current.is_none() {
            return Err(GpuError::OperationFailed("draw without a current surface".into()));
        }
        if self.shared.faults.draw.load(Ordering::SeqCst) {
            return Err(GpuError::OperationFailed("software draw disabled".into()));
        }

        let (source, size) = match input {
            DrawInput::Texture(t) => (&t.rgba, t.size),
            DrawInput::Surface(s) => (&s.rgba, s.size),
        };
        if size != target.size {
            return Err(GpuError::OperationFailed(format!(
                "input {size:?} does not match target {:?}",
                target.size
            )));
        }
        trace!(?program, ?size, "software draw");
        self.shared.counters.draws.fetch_add(1, Ordering::SeqCst);

        let radius = program.radius;
        let weights: Vec<f32> = (0..2 * radius + 1)
            .map(|i| tap_weight(program.mode, radius, i))
            .collect();
        let (w, h) = (size.width as i64, size.height as i64);
        let (dx, dy) = match program.direction {
            Direction::Horizontal => (1i64, 0i64),
            Direction::Vertical => (0, 1),
        };

        target
            .rgba
            .par_chunks_mut(size.width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..w {
                    let center = ((y as i64 * w + x) * 4) as usize;
                    let mut acc = [0.0f32; 3];
                    let mut weight_sum = 0.0f32;
                    for (i, &weight) in weights.iter().enumerate() {
                        let offset = i as i64 - radius as i64;
                        let sx = (x + offset * dx).clamp(0, w - 1);
                        let sy = (y as i64 + offset * dy).clamp(0, h - 1);
                        let idx = ((sy * w + sx) * 4) as usize;
                        for (ch, a) in acc.iter_mut().enumerate() {
                            *a += source[idx + ch] as f32 / 255.0 * weight;
                        }
                        weight_sum += weight;
                    }
                    let out = &mut row[x as usize * 4..x as usize * 4 + 4];
                    for (ch, a) in acc.iter().enumerate() {
                        out[ch] = (a / weight_sum * 255.0).round().clamp(0.0, 255.0) as u8;
                    }
                    out[3] = source[center + 3];
                }
            });
        Ok(())
    }

    fn read_pixels(&self, context: &mut SoftwareContext, surface: &SoftwareSurface, image: &mut ImageBuffer) -> GpuResult<()> {
        Self::check_owner(context)?;
        if surface.size != Size::of(image) {
            return Err(GpuError::Readback(format!(
                "surface {:?} does not match {}x{} image",
                surface.size,
                image.width(),
                image.height()
            )));
        }
        from_rgba(&surface.rgba, image);
        Ok(())
    }
}
