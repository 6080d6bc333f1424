//! Blur execution backends.
//!
//! Every backend filters an [`ImageBuffer`] in place with the same two-pass
//! separable convolution; they differ only in where the work runs.

mod cpu;
mod gpu;
pub mod native;

pub use cpu::{CpuBlur, CpuPassTask};
pub use gpu::GpuBlur;
pub use native::NativeBlur;

use std::sync::Arc;

use tracing::debug;

use crate::config::{Backend, BlurConfiguration};
use crate::gpu::{GpuDevice, SoftwareDevice};
use crate::image::ImageBuffer;
use crate::scheduler::ConcurrentTaskScheduler;
use crate::FrostResult;
use native::NativeBlurFn;

/// What a successful [`BlurBackend::blur`] did to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurOutcome {
    /// Both passes ran.
    Blurred,
    /// The backend could not bring up its resources and left the image
    /// untouched.
    Unblurred,
}

/// A blur execution strategy.
pub trait BlurBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Blur `image` in place with both passes.
    fn blur(&self, image: &mut ImageBuffer) -> FrostResult<BlurOutcome>;

    /// Drop pooled or per-thread resources. The backend stays usable and
    /// recreates them on demand.
    fn release_resources(&self) {}
}

/// Zero-radius blur: leaves the image untouched without dispatching work.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityBlur;

impl BlurBackend for IdentityBlur {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn blur(&self, _image: &mut ImageBuffer) -> FrostResult<BlurOutcome> {
        Ok(BlurOutcome::Blurred)
    }
}

/// Collaborators the factory wires into the backends.
#[derive(Clone)]
pub struct BackendOptions {
    pub gpu_device: GpuDevice,
    pub native_routine: NativeBlurFn,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            gpu_device: GpuDevice::default(),
            native_routine: native::frost_native_blur,
        }
    }
}

/// Resolve the backend for a validated configuration.
pub fn create_backend(config: &BlurConfiguration, options: &BackendOptions) -> FrostResult<Box<dyn BlurBackend>> {
    if config.is_identity() {
        debug!("radius 0, using identity backend");
        return Ok(Box::new(IdentityBlur));
    }

    let scheduler = if config.concurrent() {
        let scheduler = match config.workers() {
            Some(workers) => ConcurrentTaskScheduler::with_workers(workers)?,
            None => ConcurrentTaskScheduler::new()?,
        };
        Some(Arc::new(scheduler))
    } else {
        None
    };

    let backend: Box<dyn BlurBackend> = match config.backend() {
        Backend::Cpu => Box::new(CpuBlur::new(config.mode(), config.radius(), scheduler)),
        Backend::Native => Box::new(NativeBlur::new(
            config.mode(),
            config.radius(),
            options.native_routine,
            scheduler,
        )),
        Backend::Gpu => create_gpu_backend(config, &options.gpu_device)?,
    };

    debug!(backend = backend.name(), mode = %config.mode(), radius = config.radius(), "backend resolved");
    Ok(backend)
}

fn create_gpu_backend(config: &BlurConfiguration, device: &GpuDevice) -> FrostResult<Box<dyn BlurBackend>> {
    match device {
        GpuDevice::Software(device) => Ok(Box::new(GpuBlur::new(
            Arc::new(device.clone()),
            config.mode(),
            config.radius(),
        ))),
        GpuDevice::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                let device = crate::gpu::WgpuDevice::new()?;
                Ok(Box::new(GpuBlur::new(Arc::new(device), config.mode(), config.radius())))
            }
            #[cfg(not(feature = "wgpu"))]
            {
                Err(crate::BlurError::UnsupportedOperation(
                    "wgpu feature not enabled".to_string(),
                ))
            }
        }
        GpuDevice::Auto => {
            #[cfg(feature = "wgpu")]
            {
                match crate::gpu::WgpuDevice::new() {
                    Ok(device) => {
                        return Ok(Box::new(GpuBlur::new(Arc::new(device), config.mode(), config.radius())));
                    }
                    Err(e) => tracing::warn!("wgpu unavailable ({e}), using software offscreen device"),
                }
            }
            #[cfg(not(feature = "wgpu"))]
            {
                debug!("wgpu feature not enabled, using software offscreen device");
            }
            Ok(Box::new(GpuBlur::new(
                Arc::new(SoftwareDevice::new()),
                config.mode(),
                config.radius(),
            )))
        }
    }
}

/// Describe backends usable on this system.
pub fn describe_backends() -> String {
    let mut out = String::new();
    out.push_str("cpu     available (rayon worker pool)\n");
    out.push_str("native  available (built-in fixed-point routine)\n");
    #[cfg(feature = "wgpu")]
    {
        if crate::gpu::WgpuDevice::is_available() {
            out.push_str("gpu     available (wgpu)\n");
        } else {
            out.push_str("gpu     available (software offscreen device, no wgpu adapter)\n");
        }
    }
    #[cfg(not(feature = "wgpu"))]
    out.push_str("gpu     available (software offscreen device)\n");
    out
}
