//! GPU backend: two offscreen render passes per blur.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace};

use super::{BlurBackend, BlurOutcome};
use crate::config::{Direction, Mode};
use crate::gpu::{BlurProgram, DrawInput, GpuResult, OffscreenDevice, OffscreenRenderContext, ResourcePool, Size};
use crate::image::ImageBuffer;
use crate::FrostResult;

/// Offscreen GPU blur over any [`OffscreenDevice`].
///
/// Owns the per-thread render contexts and the surface and texture pools.
pub struct GpuBlur<D: OffscreenDevice> {
    device: Arc<D>,
    mode: Mode,
    radius: u32,
    contexts: OffscreenRenderContext<D>,
    surfaces: ResourcePool<Size, D::Surface>,
    textures: ResourcePool<Size, D::Texture>,
}

impl<D: OffscreenDevice> GpuBlur<D> {
    pub fn new(device: Arc<D>, mode: Mode, radius: u32) -> Self {
        let surfaces = {
            let (sizer, destroyer) = (device.clone(), device.clone());
            ResourcePool::by_size(
                "surface",
                move |s: &D::Surface| sizer.surface_size(s),
                move |s: D::Surface| destroyer.destroy_surface(s),
            )
        };
        let textures = {
            let (sizer, destroyer) = (device.clone(), device.clone());
            ResourcePool::by_size(
                "texture",
                move |t: &D::Texture| sizer.texture_size(t),
                move |t: D::Texture| destroyer.destroy_texture(t),
            )
        };
        Self {
            contexts: OffscreenRenderContext::new(device.clone()),
            device,
            mode,
            radius,
            surfaces,
            textures,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn contexts(&self) -> &OffscreenRenderContext<D> {
        &self.contexts
    }

    pub fn surface_pool(&self) -> &ResourcePool<Size, D::Surface> {
        &self.surfaces
    }

    pub fn texture_pool(&self) -> &ResourcePool<Size, D::Texture> {
        &self.textures
    }

    fn program(&self, direction: Direction) -> BlurProgram {
        BlurProgram {
            mode: self.mode,
            radius: self.radius,
            direction,
        }
    }

    fn render(&self, context: &mut D::Context, image: &mut ImageBuffer) -> GpuResult<()> {
        let size = Size::of(image);
        let device = &*self.device;

        let intermediate = self.surfaces.get(&size, |s| device.create_surface(context, *s))?;
        let target = match self.surfaces.get(&size, |s| device.create_surface(context, *s)) {
            Ok(target) => target,
            Err(e) => {
                self.surfaces.put(intermediate);
                return Err(e);
            }
        };
        let texture = match self.textures.get(&size, |s| device.create_texture(context, *s)) {
            Ok(texture) => texture,
            Err(e) => {
                self.surfaces.put(intermediate);
                self.surfaces.put(target);
                return Err(e);
            }
        };

        let (mut intermediate, mut target, mut texture) = (intermediate, target, texture);
        let result = self.run_passes(context, &mut texture, &mut intermediate, &mut target, image);
        device.release_current(context);

        self.textures.put(texture);
        self.surfaces.put(intermediate);
        self.surfaces.put(target);
        result
    }

    fn run_passes(
        &self,
        context: &mut D::Context,
        texture: &mut D::Texture,
        intermediate: &mut D::Surface,
        target: &mut D::Surface,
        image: &mut ImageBuffer,
    ) -> GpuResult<()> {
        let device = &*self.device;
        device.make_current(context, target)?;
        device.upload(context, texture, image)?;
        device.draw(
            context,
            self.program(Direction::Horizontal),
            DrawInput::Texture(&*texture),
            intermediate,
        )?;
        device.draw(
            context,
            self.program(Direction::Vertical),
            DrawInput::Surface(&*intermediate),
            target,
        )?;
        device.read_pixels(context, target, image)
    }
}

impl<D: OffscreenDevice> BlurBackend for GpuBlur<D> {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn blur(&self, image: &mut ImageBuffer) -> FrostResult<BlurOutcome> {
        trace!(w = image.width(), h = image.height(), device = self.device.name(), "GpuBlur::blur");
        let start = Instant::now();

        match self.contexts.with_current(|context| self.render(context, image)) {
            Ok(()) => {
                debug!(
                    device = self.device.name(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "gpu blur done"
                );
                Ok(BlurOutcome::Blurred)
            }
            Err(e) if e.is_creation_failure() => {
                error!(device = self.device.name(), "gpu resource creation failed, image left unblurred: {e}");
                Ok(BlurOutcome::Unblurred)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release_resources(&self) {
        debug!(
            surfaces = self.surfaces.len(),
            textures = self.textures.len(),
            contexts = self.contexts.len(),
            "releasing gpu resources"
        );
        self.textures.evict_all();
        self.surfaces.evict_all();
        self.contexts.teardown();
    }
}

impl<D: OffscreenDevice> Drop for GpuBlur<D> {
    fn drop(&mut self) {
        self.release_resources();
    }
}
