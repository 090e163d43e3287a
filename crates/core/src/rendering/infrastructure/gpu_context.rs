use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wgpu::util::DeviceExt;

use crate::effects::domain::render_command::{Kernel, RenderCommand, Vertex};
use crate::rendering::domain::image_renderer::RenderError;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Shared GPU state for effect rendering.
///
/// Holds the wgpu device, queue, pipeline and sampler so they can be reused
/// across frames without re-initialization.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    // Error scopes are a device-wide stack; one frame in flight at a time.
    frame_lock: Mutex<()>,
}

/// Per-command params matching the WGSL uniform layout (32 bytes).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuEffectParams {
    pub mode: u32,
    pub amount: f32,
    pub mirrored: u32,
    pub _pad: u32,
    pub cell_size: [f32; 2],
    pub texture_size: [f32; 2],
}

impl GpuEffectParams {
    pub fn for_command(command: &RenderCommand, mirrored: bool, width: u32, height: u32) -> Self {
        let (mode, amount, cell_size) = match command.kernel {
            Kernel::Passthrough => (0, 1.0, [1.0, 1.0]),
            Kernel::Saturation { amount } => (1, amount, [1.0, 1.0]),
            Kernel::Pixellate { cell_size } => (2, 1.0, cell_size),
        };
        Self {
            mode,
            amount,
            mirrored: mirrored as u32,
            _pad: 0,
            cell_size,
            texture_size: [width as f32, height as f32],
        }
    }
}

/// Pads each row of a readback to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl GpuContext {
    /// Create a new GPU context. Returns `None` if no suitable adapter is available.
    pub fn new() -> Option<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("effect-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .ok()?;

        log::debug!("GPU adapter: {:?}", adapter.get_info());

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("effect-passes-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/effect_passes.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("effect-bind-group-layout"),
            entries: &[
                // params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // source texture
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("effect-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("effect-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("nearest-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Some(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            frame_lock: Mutex::new(()),
        })
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Draws `commands` over an RGBA source in one render pass and reads the
    /// target back as tightly packed RGBA bytes.
    pub fn render_commands(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        commands: &[RenderCommand],
        mirrored: bool,
    ) -> Result<Vec<u8>, RenderError> {
        if commands.is_empty() {
            return Ok(vec![0; width as usize * height as usize * 4]);
        }
        let _guard = self.lock_frame();

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let staging = self.encode_and_submit(rgba, width, height, commands, mirrored);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = oom.or(validation) {
            return Err(map_gpu_error(err));
        }

        self.read_back(&staging, width, height)
    }

    fn encode_and_submit(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        commands: &[RenderCommand],
        mirrored: bool,
    ) -> wgpu::Buffer {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let source = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("effect-source"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );

        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("effect-target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let vertices: Vec<Vertex> = commands
            .iter()
            .flat_map(|c| c.geometry.vertices())
            .collect();
        let vertex_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("effect-vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let bind_groups: Vec<wgpu::BindGroup> = commands
            .iter()
            .map(|command| {
                let params = GpuEffectParams::for_command(command, mirrored, width, height);
                let params_buf = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("effect-params"),
                        contents: bytemuck::bytes_of(&params),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("effect-bind-group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: params_buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&source_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                })
            })
            .collect();

        let padded_row = padded_bytes_per_row(width);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("effect-staging"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("effect-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("effect-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
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
            pass.set_pipeline(&self.pipeline);
            pass.set_vertex_buffer(0, vertex_buf.slice(..));
            for (i, bind_group) in bind_groups.iter().enumerate() {
                let first = (i * 4) as u32;
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(first..first + 4, 0..1);
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            size,
        );
        self.queue.submit(Some(encoder.finish()));

        staging
    }

    fn read_back(
        &self,
        staging: &wgpu::Buffer,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RenderError::Gpu(format!("readback failed: {e}"))),
            Err(_) => return Err(RenderError::Gpu("readback was never mapped".into())),
        }

        let padded_row = padded_bytes_per_row(width) as usize;
        let row = width as usize * 4;
        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(row * height as usize);
        for chunk in mapped.chunks(padded_row).take(height as usize) {
            pixels.extend_from_slice(&chunk[..row]);
        }
        drop(mapped);
        staging.unmap();

        Ok(pixels)
    }

    fn lock_frame(&self) -> MutexGuard<'_, ()> {
        self.frame_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn map_gpu_error(err: wgpu::Error) -> RenderError {
    match err {
        wgpu::Error::OutOfMemory { .. } => RenderError::OutOfMemory,
        other => RenderError::Gpu(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<GpuEffectParams>(), 32);
    }

    #[test]
    fn test_padded_row_is_aligned() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_params_for_kernels() {
        let pixellate = RenderCommand {
            kernel: Kernel::Pixellate {
                cell_size: [50.0, 50.0],
            },
            geometry: crate::effects::domain::render_command::Geometry::FullViewport,
        };
        let params = GpuEffectParams::for_command(&pixellate, true, 640, 480);
        assert_eq!(params.mode, 2);
        assert_eq!(params.mirrored, 1);
        assert_eq!(params.cell_size, [50.0, 50.0]);
        assert_eq!(params.texture_size, [640.0, 480.0]);
    }

    #[test]
    fn test_context_creation_does_not_panic() {
        // Result depends on hardware.
        let _ = GpuContext::new();
    }
}
