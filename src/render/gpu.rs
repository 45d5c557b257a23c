//! wgpu backend
//!
//! A headless device with an offscreen "screen" (color plus depth/stencil)
//! standing in for the map's main framebuffer. Every draw is recorded into
//! its own render pass that loads the existing attachment contents, so
//! uploads issued between draws are always ordered before the draws that
//! sample them.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::core::{Error, Result};
use crate::render::context::{
    AddressMode, DrawCall, FilterMode, FramebufferId, Program, ProgramKind, RenderContext,
    RenderTarget, Texture, TextureDescriptor, TextureFormat, TextureId, Viewport,
};
use crate::render::geometry::{QuadGeometry, RasterBoundsVertex};
use crate::render::modes::{ColorMode, CompareFunction, CullFaceMode, DepthMask, StencilMode};

const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

impl TextureFormat {
    fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: Texture,
}

/// Fixed-function state baked into a render pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramKind,
    target_format: TextureFormat,
    /// Drawing to the screen, which has a depth/stencil attachment
    depth_stencil: bool,
    terrain: bool,
    color_mode: ColorMode,
    cull_face_mode: CullFaceMode,
    depth_func: CompareFunction,
    depth_write: bool,
    /// Stencil state without the reference, which is dynamic
    stencil: StencilMode,
}

impl PipelineKey {
    fn new(call: &DrawCall<'_>, target_format: TextureFormat, depth_stencil: bool) -> Self {
        let (depth_func, depth_write, stencil) = if depth_stencil {
            (
                call.depth_mode.func,
                call.depth_mode.mask == DepthMask::ReadWrite,
                StencilMode {
                    reference: 0,
                    ..call.stencil_mode
                },
            )
        } else {
            (CompareFunction::Always, false, StencilMode::disabled())
        };
        Self {
            program: call.program.kind(),
            target_format,
            depth_stencil,
            terrain: call.terrain.is_some() && call.program.kind() == ProgramKind::Hillshade,
            color_mode: call.color_mode,
            cull_face_mode: call.cull_face_mode,
            depth_func,
            depth_write,
            stencil,
        }
    }
}

/// Headless wgpu implementation of [`RenderContext`]
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    screen: wgpu::Texture,
    screen_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    prepare_shader: wgpu::ShaderModule,
    hillshade_shader: wgpu::ShaderModule,
    draw_layout: wgpu::BindGroupLayout,
    terrain_layout: wgpu::BindGroupLayout,
    flat_pipeline_layout: wgpu::PipelineLayout,
    terrain_pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<(FilterMode, AddressMode), wgpu::Sampler>,
    geometry: Option<(QuadGeometry, wgpu::Buffer, wgpu::Buffer)>,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    next_id: u64,
    target: RenderTarget,
    viewport: Viewport,
}

impl WgpuContext {
    /// Create a context on the default adapter, blocking until ready
    pub fn new_headless(width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new_headless_async(width, height))
    }

    pub async fn new_headless_async(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hillshade_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                experimental_features: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let max = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(Error::ResourceAllocation(format!(
                "screen size {}x{} outside 1..={}",
                width, height, max
            )));
        }

        let screen = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen_color"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let screen_view = screen.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen_depth_stencil"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let prepare_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hillshade_prepare_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/hillshade_prepare.wgsl").into()),
        });
        let hillshade_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hillshade_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/hillshade.wgsl").into()),
        });

        // Group 0: uniforms + sampled input
        let draw_layout = sampled_layout(
            &device,
            "hillshade_draw_layout",
            wgpu::ShaderStages::VERTEX_FRAGMENT,
            wgpu::ShaderStages::FRAGMENT,
        );
        // Group 1: terrain elevation, read by the vertex stage
        let terrain_layout = sampled_layout(
            &device,
            "hillshade_terrain_layout",
            wgpu::ShaderStages::VERTEX,
            wgpu::ShaderStages::VERTEX,
        );

        let flat_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hillshade_flat_pipeline_layout"),
            bind_group_layouts: &[&draw_layout],
            immediate_size: 0,
        });
        let terrain_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hillshade_terrain_pipeline_layout"),
            bind_group_layouts: &[&draw_layout, &terrain_layout],
            immediate_size: 0,
        });

        let mut context = Self {
            device,
            queue,
            width,
            height,
            screen,
            screen_view,
            depth_view,
            prepare_shader,
            hillshade_shader,
            draw_layout,
            terrain_layout,
            flat_pipeline_layout,
            terrain_pipeline_layout,
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            geometry: None,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            next_id: 1,
            target: RenderTarget::Screen,
            viewport: Viewport::new(0, 0, width, height),
        };
        context.clear_color([0.0; 4]);
        Ok(context)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Fill the screen color, reset depth to 1 and stencil to 0
    pub fn clear_color(&mut self, color: [f32; 4]) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear_screen_encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_screen_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.screen_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Screen pixels, row-major from the top-left corner
    pub fn read_screen(&self) -> Result<Vec<[u8; 4]>> {
        let bytes = self.read_raw(&self.screen, self.width, self.height, 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect())
    }

    /// Texel values of a texture, converted to `f32`
    pub fn read_texture(&self, texture: &Texture) -> Result<Vec<[f32; 4]>> {
        let gpu = self.texture(texture.id)?;
        let bpp = gpu.desc.format.bytes_per_pixel();
        let bytes = self.read_raw(&gpu.texture, gpu.desc.width, gpu.desc.height, bpp)?;
        let texels = match gpu.desc.format {
            TextureFormat::Rgba8Unorm => bytes
                .chunks_exact(4)
                .map(|p| std::array::from_fn(|i| p[i] as f32 / 255.0))
                .collect(),
            TextureFormat::Rgba16Float => bytes
                .chunks_exact(8)
                .map(|p| {
                    std::array::from_fn(|i| half::f16::from_le_bytes([p[i * 2], p[i * 2 + 1]]).to_f32())
                })
                .collect(),
        };
        Ok(texels)
    }

    fn read_raw(&self, texture: &wgpu::Texture, width: u32, height: u32, bpp: u32) -> Result<Vec<u8>> {
        let tight_bpr = width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bpr = tight_bpr.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: (padded_bpr * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| Error::Gpu(e.to_string()))?;
        rx.recv()
            .map_err(|e| Error::Gpu(format!("readback channel closed: {}", e)))?
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut tight = Vec::with_capacity((tight_bpr * height) as usize);
        for row in data.chunks_exact(padded_bpr as usize) {
            tight.extend_from_slice(&row[..tight_bpr as usize]);
        }
        drop(data);
        staging.unmap();
        Ok(tight)
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| Error::Gpu(format!("unknown texture {:?}", id)))
    }

    fn ensure_sampler(&mut self, filter: FilterMode, address: AddressMode) {
        let device = &self.device;
        self.samplers.entry((filter, address)).or_insert_with(|| {
            let filter_mode = match filter {
                FilterMode::Nearest => wgpu::FilterMode::Nearest,
                FilterMode::Linear => wgpu::FilterMode::Linear,
            };
            let address_mode = match address {
                AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("hillshade_sampler"),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: filter_mode,
                min_filter: filter_mode,
                ..Default::default()
            })
        });
    }

    fn create_pipeline(&self, key: &PipelineKey) -> wgpu::RenderPipeline {
        let (module, vertex_entry, layout) = match (key.program, key.terrain) {
            (ProgramKind::HillshadePrepare, _) => (&self.prepare_shader, "vs_main", &self.flat_pipeline_layout),
            (ProgramKind::Hillshade, false) => (&self.hillshade_shader, "vs_main", &self.flat_pipeline_layout),
            (ProgramKind::Hillshade, true) => (&self.hillshade_shader, "vs_terrain", &self.terrain_pipeline_layout),
        };

        let depth_stencil = key.depth_stencil.then(|| {
            let face = wgpu::StencilFaceState {
                compare: key.stencil.func.to_wgpu(),
                fail_op: key.stencil.fail.to_wgpu(),
                depth_fail_op: key.stencil.depth_fail.to_wgpu(),
                pass_op: key.stencil.pass.to_wgpu(),
            };
            wgpu::DepthStencilState {
                format: DEPTH_STENCIL_FORMAT,
                depth_write_enabled: key.depth_write,
                depth_compare: key.depth_func.to_wgpu(),
                stencil: wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: key.stencil.mask,
                    write_mask: key.stencil.write_mask,
                },
                bias: wgpu::DepthBiasState::default(),
            }
        });

        log::debug!("Creating pipeline {:?}", key);
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("hillshade_pipeline"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some(vertex_entry),
                buffers: &[RasterBoundsVertex::layout()],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: match key.cull_face_mode {
                    CullFaceMode::Disabled => None,
                    CullFaceMode::Back => Some(wgpu::Face::Back),
                },
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.target_format.to_wgpu(),
                    blend: key.color_mode.to_wgpu(),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        })
    }

    fn upload_geometry(&mut self, geometry: &QuadGeometry) {
        let stale = self.geometry.as_ref().is_none_or(|(cached, _, _)| cached != geometry);
        if stale {
            let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("raster_bounds_vertices"),
                contents: bytemuck::cast_slice(&geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad_triangle_indices"),
                contents: bytemuck::cast_slice(&geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            self.geometry = Some((geometry.clone(), vertices, indices));
        }
    }

    fn uniform_bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        contents: &[u8],
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("hillshade_uniforms"),
            contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hillshade_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn sampled_layout(
    device: &wgpu::Device,
    label: &str,
    uniform_visibility: wgpu::ShaderStages,
    texture_visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: uniform_visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: texture_visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: texture_visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

impl RenderContext for WgpuContext {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(Error::ResourceAllocation(format!(
                "{} size {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.allocate_id());
        let handle = Texture {
            id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        };
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: handle,
            },
        );
        Ok(handle)
    }

    fn write_texture(&mut self, texture: &Texture, data: &[u8]) -> Result<()> {
        let gpu = self.texture(texture.id)?;
        let bpp = gpu.desc.format.bytes_per_pixel();
        let expected = (gpu.desc.width * gpu.desc.height * bpp) as usize;
        if data.len() != expected {
            return Err(Error::Gpu(format!(
                "texture write of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(gpu.desc.width * bpp),
                rows_per_image: Some(gpu.desc.height),
            },
            wgpu::Extent3d {
                width: gpu.desc.width,
                height: gpu.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: Texture) {
        if let Some(gpu) = self.textures.remove(&texture.id) {
            gpu.texture.destroy();
        }
    }

    fn create_framebuffer(&mut self, color: &Texture) -> Result<FramebufferId> {
        self.texture(color.id)?;
        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(id, color.id);
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.target == RenderTarget::Framebuffer(framebuffer) {
            self.target = RenderTarget::Screen;
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.target = target;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn clear_stencil(&mut self) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear_stencil_encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_stencil_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let (target_id, target_format, target_size) = match self.target {
            RenderTarget::Screen => (None, TextureFormat::Rgba8Unorm, (self.width, self.height)),
            RenderTarget::Framebuffer(framebuffer) => {
                let id = *self
                    .framebuffers
                    .get(&framebuffer)
                    .ok_or_else(|| Error::Gpu(format!("unknown framebuffer {:?}", framebuffer)))?;
                let desc = self.texture(id)?.desc;
                (Some(id), desc.format, (desc.width, desc.height))
            }
        };
        if target_id.is_some_and(|id| {
            id == call.texture.texture.id || call.terrain.is_some_and(|t| t.texture.id == id)
        }) {
            return Err(Error::Gpu("draw samples its own render target".into()));
        }
        let vp = self.viewport;
        if vp.width == 0 || vp.height == 0 || vp.x + vp.width > target_size.0 || vp.y + vp.height > target_size.1 {
            return Err(Error::Gpu(format!("viewport {:?} outside target {:?}", vp, target_size)));
        }

        let key = PipelineKey::new(call, target_format, target_id.is_none());
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.create_pipeline(&key);
            self.pipelines.insert(key, pipeline);
        }
        self.ensure_sampler(call.texture.filter, call.texture.address);
        self.ensure_sampler(FilterMode::Nearest, AddressMode::ClampToEdge);
        self.upload_geometry(call.geometry);

        let uniforms: &[u8] = match &call.program {
            Program::HillshadePrepare(u) => bytemuck::bytes_of(u),
            Program::Hillshade(u) => bytemuck::bytes_of(u),
        };
        let source = self.texture(call.texture.texture.id)?;
        let draw_group = self.uniform_bind_group(
            &self.draw_layout,
            uniforms,
            &source.view,
            &self.samplers[&(call.texture.filter, call.texture.address)],
        );
        let terrain_group = match call.terrain {
            Some(terrain) if key.terrain => {
                let texture = self.texture(terrain.texture.id)?;
                Some(self.uniform_bind_group(
                    &self.terrain_layout,
                    bytemuck::bytes_of(&terrain.uniforms()),
                    &texture.view,
                    &self.samplers[&(FilterMode::Nearest, AddressMode::ClampToEdge)],
                ))
            }
            _ => None,
        };

        let color_view = match target_id {
            Some(id) => &self.texture(id)?.view,
            None => &self.screen_view,
        };
        let depth_stencil_attachment = target_id.is_none().then(|| wgpu::RenderPassDepthStencilAttachment {
            view: &self.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
        });
        let depth_range = if target_id.is_none() { call.depth_mode.range } else { [0.0, 1.0] };
        let Some((_, vertices, indices)) = self.geometry.as_ref() else {
            return Err(Error::Gpu("geometry buffers missing".into()));
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hillshade_draw_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(call.layer_id),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_pipeline(&self.pipelines[&key]);
            pass.set_viewport(
                vp.x as f32,
                vp.y as f32,
                vp.width as f32,
                vp.height as f32,
                depth_range[0],
                depth_range[1],
            );
            if target_id.is_none() {
                pass.set_stencil_reference(call.stencil_mode.reference);
            }
            pass.set_bind_group(0, &draw_group, &[]);
            if let Some(group) = &terrain_group {
                pass.set_bind_group(1, group, &[]);
            }
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
            for segment in &call.geometry.segments {
                let range = segment.first_index..segment.first_index + segment.index_count;
                pass.draw_indexed(range, segment.base_vertex, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
