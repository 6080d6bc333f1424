//! Image blur engine with interchangeable execution backends.
//!
//! One configuration-driven interface over three very different execution
//! models: pure CPU convolution (inline or fanned out over a worker pool),
//! a native routine called through a C ABI, and GPU offscreen rendering.
//!
//! # Architecture
//!
//! ```text
//! BlurEngine
//!     ├── BlurConfiguration (immutable, validated by the builder)
//!     ├── BlurBackend (resolved by create_backend)
//!     │       ├── IdentityBlur   (radius 0)
//!     │       ├── CpuBlur        ── ConcurrentTaskScheduler (rayon)
//!     │       ├── NativeBlur     ── extern "C" routine per partition
//!     │       └── GpuBlur<D>     ── OffscreenRenderContext + ResourcePool
//!     │                                 └── OffscreenDevice
//!     │                                         ├── SoftwareDevice
//!     │                                         └── WgpuDevice (feature "wgpu")
//!     └── ResultDispatcher (async delivery)
//! ```
//!
//! # Example
//!
//! ```
//! use frost::{Backend, BlurConfiguration, ImageBuffer, Mode, PixelFormat};
//!
//! let engine = BlurConfiguration::builder()
//!     .mode(Mode::Box)
//!     .radius(2)
//!     .backend(Backend::Cpu)
//!     .build()?;
//!
//! let image = ImageBuffer::filled(16, 16, PixelFormat::Rgba8, &[255, 255, 255, 255])?;
//! let blurred = engine.blur(image)?;
//! assert!(blurred.pixels().iter().all(|&v| v == 255));
//! # Ok::<(), frost::BlurError>(())
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod gpu;
pub mod image;
pub mod kernel;
pub mod resample;
pub mod scheduler;
mod shaders;

pub use backend::{
    create_backend, describe_backends, BackendOptions, BlurBackend, BlurOutcome, CpuBlur, GpuBlur, IdentityBlur, NativeBlur,
};
pub use backend::native::{NativeBitmap, NativeBlurFn, frost_native_blur};
pub use config::{Backend, BlurConfiguration, BlurEngineBuilder, Direction, Mode, MAX_RADIUS};
pub use dispatch::{BlurCallback, BlurResult, InlineDispatcher, LoopDispatcher, RequestId, ResultDispatcher, ResultLoop};
pub use engine::BlurEngine;
pub use gpu::{GpuDevice, GpuError, GpuResult, OffscreenDevice, Size, SoftwareDevice};
pub use image::{ImageBuffer, PixelFormat};
pub use scheduler::{BlurTask, ConcurrentTaskScheduler, Partition};

use thiserror::Error;

/// Blur engine errors.
#[derive(Error, Debug)]
pub enum BlurError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Input image buffer was already recycled")]
    RecycledInput,

    #[error("Backend failure: {0}")]
    BackendFailure(String),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Request superseded by a newer request")]
    Superseded,

    #[error("Engine shut down before the request ran")]
    ShutDown,
}

pub type FrostResult<T> = Result<T, BlurError>;
