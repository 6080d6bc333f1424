//! Offscreen GPU rendering.
//!
//! [`OffscreenDevice`] is the capability seam of the GPU backend: contexts,
//! render surfaces, textures, a fragment-program draw and pixel readback.
//! The backend itself only orchestrates these calls; see
//! [`GpuBlur`](crate::GpuBlur).
//!
//! # Devices
//!
//! - [`SoftwareDevice`] - always available, evaluates the fragment program
//!   per fragment on the CPU
//! - `WgpuDevice` - real offscreen rendering (feature `wgpu`)

mod context;
mod pool;
mod software;
#[cfg(feature = "wgpu")]
mod wgpu_device;

pub use context::OffscreenRenderContext;
pub use pool::ResourcePool;
pub use software::{SoftwareContext, SoftwareDevice, SoftwareStats, SoftwareSurface, SoftwareTexture};
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;

use thiserror::Error;

use crate::config::{Direction, Mode};
use crate::image::ImageBuffer;
use crate::BlurError;

/// GPU operation errors.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to create render context: {0}")]
    ContextCreation(String),

    #[error("Failed to create surface: {0}")]
    SurfaceCreation(String),

    #[error("Failed to create texture: {0}")]
    TextureCreation(String),

    #[error("Render context used off its owner thread")]
    WrongThread,

    #[error("Failed to compile shader: {0}")]
    ShaderCompilation(String),

    #[error("Pixel readback failed: {0}")]
    Readback(String),

    #[error("GPU operation failed: {0}")]
    OperationFailed(String),
}

impl GpuError {
    /// Failure to bring up a resource, as opposed to a failure while rendering.
    pub fn is_creation_failure(&self) -> bool {
        matches!(
            self,
            Self::NoAdapter | Self::ContextCreation(_) | Self::SurfaceCreation(_) | Self::TextureCreation(_)
        )
    }
}

impl From<GpuError> for BlurError {
    fn from(e: GpuError) -> Self {
        BlurError::BackendFailure(e.to_string())
    }
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Surface and texture dimensions; the pool key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &ImageBuffer) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// One fragment-program pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurProgram {
    pub mode: Mode,
    pub radius: u32,
    pub direction: Direction,
}

/// Source of a draw call.
pub enum DrawInput<'a, D: OffscreenDevice + ?Sized> {
    Texture(&'a D::Texture),
    Surface(&'a D::Surface),
}

/// GPU capability seam.
///
/// Contexts belong to the thread that created them. Surfaces and textures
/// can be pooled and reused by any context of the same device.
pub trait OffscreenDevice: Send + Sync + 'static {
    type Context: Send;
    type Surface: Send;
    type Texture: Send;

    fn name(&self) -> &'static str;

    fn create_context(&self) -> GpuResult<Self::Context>;
    fn destroy_context(&self, context: Self::Context);

    fn create_surface(&self, context: &Self::Context, size: Size) -> GpuResult<Self::Surface>;
    fn destroy_surface(&self, surface: Self::Surface);
    fn surface_size(&self, surface: &Self::Surface) -> Size;

    fn create_texture(&self, context: &Self::Context, size: Size) -> GpuResult<Self::Texture>;
    fn destroy_texture(&self, texture: Self::Texture);
    fn texture_size(&self, texture: &Self::Texture) -> Size;

    /// Bind `surface` as the current target. Fails with
    /// [`GpuError::WrongThread`] off the context's owner thread.
    fn make_current(&self, context: &mut Self::Context, surface: &Self::Surface) -> GpuResult<()>;
    fn release_current(&self, context: &mut Self::Context);

    fn upload(&self, context: &mut Self::Context, texture: &mut Self::Texture, image: &ImageBuffer) -> GpuResult<()>;

    /// Run `program` over every fragment of `target`, sampling `input`.
    fn draw(
        &self,
        context: &mut Self::Context,
        program: BlurProgram,
        input: DrawInput<'_, Self>,
        target: &mut Self::Surface,
    ) -> GpuResult<()>;

    /// Copy `surface` into `image`, converting to the image's pixel format.
    fn read_pixels(&self, context: &mut Self::Context, surface: &Self::Surface, image: &mut ImageBuffer) -> GpuResult<()>;
}

/// Device selection for the GPU backend.
#[derive(Debug, Clone, Default)]
pub enum GpuDevice {
    /// wgpu when compiled in and an adapter exists, otherwise software.
    #[default]
    Auto,
    /// The given software device.
    Software(SoftwareDevice),
    /// wgpu only (feature `wgpu`).
    Wgpu,
}

/// Expand `image` to tightly packed RGBA.
pub(crate) fn to_rgba(image: &ImageBuffer) -> Vec<u8> {
    match image.channels() {
        4 => image.pixels().to_vec(),
        _ => image.pixels().iter().flat_map(|&v| [v, v, v, 255]).collect(),
    }
}

/// Write tightly packed RGBA `rgba` into `image` in its own format.
pub(crate) fn from_rgba(rgba: &[u8], image: &mut ImageBuffer) {
    match image.channels() {
        4 => image.pixels_mut().copy_from_slice(rgba),
        _ => {
            for (dst, px) in image.pixels_mut().iter_mut().zip(rgba.chunks_exact(4)) {
                *dst = px[0];
            }
        }
    }
}
