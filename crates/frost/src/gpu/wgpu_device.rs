//! wgpu offscreen device.
//!
//! Surfaces are `Rgba8Unorm` render targets, textures are sampled inputs.
//! Each mode gets its own render pipeline; a pass draws one full-screen
//! triangle into the target.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use super::{from_rgba, to_rgba, BlurProgram, DrawInput, GpuError, GpuResult, OffscreenDevice, Size};
use crate::config::Mode;
use crate::image::ImageBuffer;
use crate::shaders;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

// =============================================================================
// Uniforms
// =============================================================================

/// Per-pass parameters: radius, direction, width, height.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlurParams {
    radius: i32,
    direction: u32,
    width: i32,
    height: i32,
}

// =============================================================================
// Resources
// =============================================================================

/// Thread-owned render context.
pub struct WgpuContext {
    owner: ThreadId,
    current: bool,
}

pub struct WgpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
}

struct Pipelines {
    layout: wgpu::BindGroupLayout,
    box_blur: wgpu::RenderPipeline,
    gaussian: wgpu::RenderPipeline,
    stack: wgpu::RenderPipeline,
}

impl Pipelines {
    fn get(&self, mode: Mode) -> &wgpu::RenderPipeline {
        match mode {
            Mode::Box => &self.box_blur,
            Mode::Gaussian => &self.gaussian,
            Mode::Stack => &self.stack,
        }
    }
}

// =============================================================================
// WgpuDevice
// =============================================================================

/// Offscreen rendering on a wgpu adapter.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,
    adapter_name: String,
}

impl WgpuDevice {
    /// Check if an adapter is available.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    pub fn new() -> GpuResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> GpuResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("frost_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::ContextCreation(e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        let pipelines = Self::create_pipelines(&device)?;
        debug!(adapter = %adapter_name, "wgpu device ready");

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipelines,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn create_pipelines(device: &wgpu::Device) -> GpuResult<Pipelines> {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blur_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blur_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let create_pipeline = |mode: Mode| -> GpuResult<wgpu::RenderPipeline> {
            let label = format!("blur_{}", mode.name());
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(shaders::blur_program(mode).into()),
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            match pollster::block_on(device.pop_error_scope()) {
                Some(e) => Err(GpuError::ShaderCompilation(format!("{label}: {e}"))),
                None => Ok(pipeline),
            }
        };

        Ok(Pipelines {
            box_blur: create_pipeline(Mode::Box)?,
            gaussian: create_pipeline(Mode::Gaussian)?,
            stack: create_pipeline(Mode::Stack)?,
            layout,
        })
    }

    fn create_target(&self, size: Size, usage: wgpu::TextureUsages, label: &str) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn check_limits(&self, size: Size, what: &str) -> Result<(), String> {
        let max = self.device.limits().max_texture_dimension_2d;
        if size.width > max || size.height > max {
            return Err(format!("{what} {}x{} exceeds GPU limit {max}", size.width, size.height));
        }
        Ok(())
    }

    fn check_owner(context: &WgpuContext) -> GpuResult<()> {
        if context.owner == thread::current().id() {
            Ok(())
        } else {
            Err(GpuError::WrongThread)
        }
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

impl OffscreenDevice for WgpuDevice {
    type Context = WgpuContext;
    type Surface = WgpuSurface;
    type Texture = WgpuTexture;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_context(&self) -> GpuResult<WgpuContext> {
        Ok(WgpuContext {
            owner: thread::current().id(),
            current: false,
        })
    }

    fn destroy_context(&self, _context: WgpuContext) {}

    fn create_surface(&self, _context: &WgpuContext, size: Size) -> GpuResult<WgpuSurface> {
        self.check_limits(size, "surface").map_err(GpuError::SurfaceCreation)?;
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let (texture, view) = self.create_target(size, usage, "blur_surface");
        Ok(WgpuSurface { texture, view, size })
    }

    fn destroy_surface(&self, surface: WgpuSurface) {
        surface.texture.destroy();
    }

    fn surface_size(&self, surface: &WgpuSurface) -> Size {
        surface.size
    }

    fn create_texture(&self, _context: &WgpuContext, size: Size) -> GpuResult<WgpuTexture> {
        self.check_limits(size, "texture").map_err(GpuError::TextureCreation)?;
        let usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let (texture, view) = self.create_target(size, usage, "blur_input");
        Ok(WgpuTexture { texture, view, size })
    }

    fn destroy_texture(&self, texture: WgpuTexture) {
        texture.texture.destroy();
    }

    fn texture_size(&self, texture: &WgpuTexture) -> Size {
        texture.size
    }

    fn make_current(&self, context: &mut WgpuContext, _surface: &WgpuSurface) -> GpuResult<()> {
        Self::check_owner(context)?;
        context.current = true;
        Ok(())
    }

    fn release_current(&self, context: &mut WgpuContext) {
        context.current = false;
    }

    fn upload(&self, context: &mut WgpuContext, texture: &mut WgpuTexture, image: &ImageBuffer) -> GpuResult<()> {
        Self::check_owner(context)?;
        if texture.size != Size::of(image) {
            return Err(GpuError::OperationFailed(format!(
                "texture {:?} cannot hold {}x{} image",
                texture.size,
                image.width(),
                image.height()
            )));
        }
        let rgba = to_rgba(image);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture.size.width * 4),
                rows_per_image: Some(texture.size.height),
            },
            extent(texture.size),
        );
        Ok(())
    }

    fn draw(
        &self,
        context: &mut WgpuContext,
        program: BlurProgram,
        input: DrawInput<'_, Self>,
        target: &mut WgpuSurface,
    ) -> GpuResult<()> {
        Self::check_owner(context)?;
        if !context.current {
            return Err(GpuError::OperationFailed("draw without a current surface".into()));
        }
        let (view, size) = match input {
            DrawInput::Texture(t) => (&t.view, t.size),
            DrawInput::Surface(s) => (&s.view, s.size),
        };
        if size != target.size {
            return Err(GpuError::OperationFailed(format!(
                "input {size:?} does not match target {:?}",
                target.size
            )));
        }
        trace!(?program, ?size, "wgpu draw");

        let params = BlurParams {
            radius: program.radius as i32,
            direction: program.direction.as_raw(),
            width: size.width as i32,
            height: size.height as i32,
        };
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blur_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blur_bind_group"),
            layout: &self.pipelines.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blur_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blur_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(self.pipelines.get(program.mode));
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&self, context: &mut WgpuContext, surface: &WgpuSurface, image: &mut ImageBuffer) -> GpuResult<()> {
        Self::check_owner(context)?;
        let size = surface.size;
        if size != Size::of(image) {
            return Err(GpuError::Readback(format!(
                "surface {size:?} does not match {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let row_bytes = size.width * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blur_readback"),
            size: padded_row as u64 * size.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size.height),
                },
            },
            extent(size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| GpuError::Readback("map channel closed".into()))?
            .map_err(|e| GpuError::Readback(format!("map failed: {e}")))?;

        let mut rgba = Vec::with_capacity((row_bytes * size.height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded_row as usize) {
                rgba.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        staging.unmap();

        from_rgba(&rgba, image);
        Ok(())
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter_name)
            .finish()
    }
}
