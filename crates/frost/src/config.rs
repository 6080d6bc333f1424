//! Blur configuration and the engine builder.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::native::{frost_native_blur, NativeBlurFn};
use crate::dispatch::ResultDispatcher;
use crate::engine::BlurEngine;
use crate::gpu::GpuDevice;
use crate::{BlurError, FrostResult};

/// Largest accepted kernel radius.
pub const MAX_RADIUS: u32 = 4096;

// =============================================================================
// Enums
// =============================================================================

/// Kernel weight policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Uniform weights.
    Box,
    /// Normalized Gaussian bell, sigma = radius + 1.
    #[default]
    Gaussian,
    /// Triangular tent weights.
    Stack,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Box, Mode::Gaussian, Mode::Stack];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Gaussian => "gaussian",
            Self::Stack => "stack",
        }
    }

    /// Stable integer tag used across the native ABI.
    pub fn as_raw(&self) -> u32 {
        match self {
            Self::Box => 0,
            Self::Gaussian => 1,
            Self::Stack => 2,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Box),
            1 => Some(Self::Gaussian),
            2 => Some(Self::Stack),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = BlurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "box" => Ok(Self::Box),
            "gaussian" | "gauss" => Ok(Self::Gaussian),
            "stack" => Ok(Self::Stack),
            other => Err(BlurError::InvalidConfiguration(format!("unknown blur mode '{other}'"))),
        }
    }
}

/// Execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Pure Rust convolution, inline or over the worker pool.
    Cpu,
    /// Partitioned calls into a C ABI routine.
    #[default]
    Native,
    /// Offscreen rendering.
    Gpu,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Native => "native",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = BlurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" | "rust" => Ok(Self::Cpu),
            "native" => Ok(Self::Native),
            "gpu" | "opengl" => Ok(Self::Gpu),
            other => Err(BlurError::InvalidConfiguration(format!("unknown backend '{other}'"))),
        }
    }
}

/// Pass direction of a 1-D convolution sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    pub fn as_raw(&self) -> u32 {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Horizontal),
            1 => Some(Self::Vertical),
            _ => None,
        }
    }
}

// =============================================================================
// BlurConfiguration
// =============================================================================

/// Immutable blur request configuration.
///
/// Construct through [`BlurConfiguration::builder`]; values are validated once
/// and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurConfiguration {
    mode: Mode,
    backend: Backend,
    radius: u32,
    sample_factor: f32,
    concurrent: bool,
    upscale: bool,
    translate: (u32, u32),
    workers: Option<usize>,
}

impl Default for BlurConfiguration {
    fn default() -> Self {
        Self {
            mode: Mode::Gaussian,
            backend: Backend::Native,
            radius: 5,
            sample_factor: 1.0,
            concurrent: false,
            upscale: true,
            translate: (0, 0),
            workers: None,
        }
    }
}

impl BlurConfiguration {
    pub fn builder() -> BlurEngineBuilder {
        BlurEngineBuilder::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn sample_factor(&self) -> f32 {
        self.sample_factor
    }

    pub fn concurrent(&self) -> bool {
        self.concurrent
    }

    pub fn upscale(&self) -> bool {
        self.upscale
    }

    pub fn translate(&self) -> (u32, u32) {
        self.translate
    }

    pub fn workers(&self) -> Option<usize> {
        self.workers
    }

    /// Zero radius is the identity blur.
    pub fn is_identity(&self) -> bool {
        self.radius == 0
    }

    /// Kernel diameter `2 * radius + 1`.
    pub fn diameter(&self) -> u32 {
        2 * self.radius + 1
    }

    fn validate(&self) -> FrostResult<()> {
        if !self.sample_factor.is_finite() || self.sample_factor <= 0.0 || self.sample_factor > 1.0 {
            return Err(BlurError::InvalidConfiguration(format!(
                "sample factor must be in (0, 1], got {}",
                self.sample_factor
            )));
        }

        if self.radius > MAX_RADIUS {
            return Err(BlurError::InvalidConfiguration(format!(
                "radius {} exceeds the maximum of {MAX_RADIUS}",
                self.radius
            )));
        }

        if self.workers == Some(0) {
            return Err(BlurError::InvalidConfiguration("worker count must be > 0".into()));
        }

        if self.backend == Backend::Gpu && self.concurrent {
            return Err(BlurError::UnsupportedOperation(
                "GPU backend cannot run partitioned concurrent passes".into(),
            ));
        }

        Ok(())
    }

    /// Size of the downsampled working copy for a `width` x `height` source.
    pub fn scaled_size(&self, width: u32, height: u32) -> FrostResult<(u32, u32)> {
        if self.sample_factor >= 1.0 {
            return Ok((width, height));
        }
        let w = (width as f32 * self.sample_factor).round() as u32;
        let h = (height as f32 * self.sample_factor).round() as u32;
        if w == 0 || h == 0 {
            return Err(BlurError::InvalidConfiguration(format!(
                "sample factor {} scales {width}x{height} below 1x1",
                self.sample_factor
            )));
        }
        Ok((w, h))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`BlurConfiguration`] and [`BlurEngine`].
pub struct BlurEngineBuilder {
    config: BlurConfiguration,
    gpu_device: GpuDevice,
    native_routine: NativeBlurFn,
    dispatcher: Option<Arc<dyn ResultDispatcher>>,
}

impl Default for BlurEngineBuilder {
    fn default() -> Self {
        Self {
            config: BlurConfiguration::default(),
            gpu_device: GpuDevice::default(),
            native_routine: frost_native_blur,
            dispatcher: None,
        }
    }
}

impl BlurEngineBuilder {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn radius(mut self, radius: u32) -> Self {
        self.config.radius = radius;
        self
    }

    /// Downscale ratio applied before blurring, in `(0, 1]`.
    pub fn sample_factor(mut self, factor: f32) -> Self {
        self.config.sample_factor = factor;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Split each pass over the worker pool.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.config.concurrent = concurrent;
        self
    }

    /// Resample the blurred result back to the pre-downsample size.
    pub fn upscale(mut self, upscale: bool) -> Self {
        self.config.upscale = upscale;
        self
    }

    /// Blur only the sub-image starting at `(x, y)`.
    pub fn translate(mut self, x: u32, y: u32) -> Self {
        self.config.translate = (x, y);
        self
    }

    /// Worker pool size (defaults to available parallelism).
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = Some(workers);
        self
    }

    pub fn gpu_device(mut self, device: GpuDevice) -> Self {
        self.gpu_device = device;
        self
    }

    /// Replace the built-in native routine.
    pub fn native_routine(mut self, routine: NativeBlurFn) -> Self {
        self.native_routine = routine;
        self
    }

    /// Deliver async results through `dispatcher` instead of the engine's
    /// own result loop.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ResultDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate and return the configuration value.
    pub fn configuration(&self) -> FrostResult<BlurConfiguration> {
        self.config.validate()?;
        Ok(self.config.clone())
    }

    /// Validate the configuration and construct the engine.
    pub fn build(self) -> FrostResult<BlurEngine> {
        let config = self.configuration()?;
        BlurEngine::from_parts(config, self.gpu_device, self.native_routine, self.dispatcher)
    }
}
