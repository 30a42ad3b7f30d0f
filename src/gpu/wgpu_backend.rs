use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    BlendMode, BlitRegion, Capabilities, CapabilityFlags, ClearValues, CompareFunction, DrawCall,
    DrawState, DrawUniforms, FaceCulling, FilterMode, Framebuffer, FramebufferDescription,
    FramebufferId, Geometry, GpuBackend, Handle, MeshData, MeshId, PassTarget, ProgramId,
    ProgramSource, Region, SamplerBinding, SamplerSlot, StencilMode, TextureDescription,
    TextureFormat, TextureId, TextureKind, Vertex,
};

const MAX_TEXTURE_UNITS: u32 = 16;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Depth-only view of combined depth-stencil textures for sampling.
    sample_view: wgpu::TextureView,
    description: TextureDescription,
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    samplers: Vec<SamplerSlot>,
    sampler_layout: Option<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    state: DrawState,
    color: Vec<TextureFormat>,
    depth_stencil: Option<TextureFormat>,
    mesh: bool,
}

struct PendingDraw {
    program: ProgramId,
    geometry: Geometry,
    state: DrawState,
    samplers: Vec<SamplerBinding>,
    uniforms: DrawUniforms,
    viewport: Option<Region>,
}

struct PendingPass {
    label: String,
    target: PassTarget,
    clear: ClearValues,
    draws: Vec<PendingDraw>,
}

/// [`GpuBackend`] over a headless wgpu device.
///
/// Passes are collected between `begin_pass` and `end_pass` and encoded in
/// one go; everything encoded since the last flush is submitted on `flush`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    uniform_layout: wgpu::BindGroupLayout,
    uniform_stride: u64,
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    meshes: HashMap<MeshId, GpuMesh>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<(FilterMode, SamplerSlot), wgpu::Sampler>,
    pending: Option<PendingPass>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Creates a backend on the first adapter that does not need a surface.
    pub fn new_headless() -> RenderResult<Self> {
        pollster::block_on(Self::request())
    }

    pub async fn request() -> RenderResult<Self> {
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
            .map_err(|e| RenderError::load("adapter", e.to_string()))?;

        log::info!("Using adapter: {:?}", adapter.get_info());
        let adapter_features = adapter.features();

        let mut required_features = wgpu::Features::empty();
        let mut flags = CapabilityFlags::DEPTH_TEXTURES
            | CapabilityFlags::HALF_FLOAT_COLOR_TARGETS
            | CapabilityFlags::STENCIL
            | CapabilityFlags::REGION_BLIT;
        if adapter_features.contains(wgpu::Features::FLOAT32_FILTERABLE) {
            required_features |= wgpu::Features::FLOAT32_FILTERABLE;
            flags |= CapabilityFlags::FLOAT_COLOR_TARGETS;
        } else {
            log::warn!("32-bit float targets are not filterable; variance shadows disabled");
        }

        let limits = wgpu::Limits::default();
        let texture_units = limits
            .max_sampled_textures_per_shader_stage
            .min(limits.max_samplers_per_shader_stage)
            .min(MAX_TEXTURE_UNITS);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("RenderKernelDevice"),
                required_features,
                required_limits: limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| RenderError::load("device", e.to_string()))?;

        let uniform_size = mem::size_of::<DrawUniforms>() as u64;
        let alignment = u64::from(limits.min_uniform_buffer_offset_alignment);
        let uniform_stride = uniform_size.div_ceil(alignment) * alignment;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DrawUniformsLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(uniform_size),
                },
                count: None,
            }],
        });

        Ok(Self {
            device,
            queue,
            capabilities: Capabilities::new(flags, texture_units),
            uniform_layout,
            uniform_stride,
            next_id: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            pending: None,
            encoder: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The wgpu texture behind a handle, for presenting or reading back.
    pub fn texture(&self, texture: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&texture).map(|t| &t.texture)
    }

    fn allocate<T>(&mut self) -> Handle<T> {
        let id = Handle::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn allocate_texture(&mut self, description: &TextureDescription) -> TextureId {
        let layers = match description.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("KernelTexture"),
            size: wgpu::Extent3d {
                width: description.area.width.max(1),
                height: description.area.height.max(1),
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: to_wgpu_format(description.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let dimension = Some(match description.kind {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension,
            ..Default::default()
        });
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension,
            aspect: if description.format.has_stencil() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            ..Default::default()
        });
        let id = self.allocate();
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                sample_view,
                description: description.clone(),
            },
        );
        id
    }

    fn target_formats(&self, target: &PassTarget) -> RenderResult<(Vec<TextureFormat>, Option<TextureFormat>)> {
        let mut color = Vec::with_capacity(target.color.len());
        for texture in &target.color {
            color.push(self.texture_entry(*texture)?.description.format);
        }
        let depth = match target.depth_stencil {
            Some(texture) => Some(self.texture_entry(texture)?.description.format),
            None => None,
        };
        Ok((color, depth))
    }

    fn texture_entry(&self, texture: TextureId) -> RenderResult<&GpuTexture> {
        self.textures.get(&texture).ok_or_else(|| {
            RenderError::load(format!("texture {}", texture.raw()), "texture is not live")
        })
    }

    fn ensure_sampler(&mut self, filter: FilterMode, slot: SamplerSlot) {
        let filter = match slot {
            SamplerSlot::Depth2D => FilterMode::Nearest,
            _ => filter,
        };
        let device = &self.device;
        self.samplers.entry((filter, slot)).or_insert_with(|| {
            let mode = match filter {
                FilterMode::Nearest => wgpu::FilterMode::Nearest,
                FilterMode::Linear => wgpu::FilterMode::Linear,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("KernelSampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: mode,
                min_filter: mode,
                mipmap_filter: wgpu::FilterMode::Nearest,
                compare: matches!(slot, SamplerSlot::DepthCompare2D)
                    .then_some(wgpu::CompareFunction::LessEqual),
                ..Default::default()
            })
        });
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> RenderResult<()> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let program = self.programs.get(&key.program).ok_or_else(|| {
            RenderError::load(format!("program {}", key.program.raw()), "program is not live")
        })?;

        let blend = blend_state(key.state.blend);
        let write_mask = if key.state.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: to_wgpu_format(*format),
                    blend,
                    write_mask,
                })
            })
            .collect();

        let depth_stencil = key.depth_stencil.map(|format| {
            let stencil_face = match key.state.stencil {
                StencilMode::Disabled => wgpu::StencilFaceState::IGNORE,
                StencilMode::Write { .. } => wgpu::StencilFaceState {
                    compare: wgpu::CompareFunction::Always,
                    fail_op: wgpu::StencilOperation::Keep,
                    depth_fail_op: wgpu::StencilOperation::Keep,
                    pass_op: wgpu::StencilOperation::Replace,
                },
                StencilMode::Equal { .. } => wgpu::StencilFaceState {
                    compare: wgpu::CompareFunction::Equal,
                    fail_op: wgpu::StencilOperation::Keep,
                    depth_fail_op: wgpu::StencilOperation::Keep,
                    pass_op: wgpu::StencilOperation::Keep,
                },
            };
            let write_mask = match key.state.stencil {
                StencilMode::Write { .. } => 0xff,
                _ => 0,
            };
            wgpu::DepthStencilState {
                format: to_wgpu_format(format),
                depth_write_enabled: key.state.depth.write,
                depth_compare: key
                    .state
                    .depth
                    .compare
                    .map(to_wgpu_compare)
                    .unwrap_or(wgpu::CompareFunction::Always),
                stencil: if format.has_stencil() {
                    wgpu::StencilState {
                        front: stencil_face,
                        back: stencil_face,
                        read_mask: 0xff,
                        write_mask,
                    }
                } else {
                    wgpu::StencilState::default()
                },
                bias: wgpu::DepthBiasState::default(),
            }
        });

        let buffers = if key.mesh { vec![Vertex::layout()] } else { Vec::new() };
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&program.name),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs_main"),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                // Depth-only programs still run a fragment stage for alpha discard.
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: match key.state.cull {
                        FaceCulling::None => None,
                        FaceCulling::Back => Some(wgpu::Face::Back),
                        FaceCulling::Front => Some(wgpu::Face::Front),
                    },
                    front_face: wgpu::FrontFace::Ccw,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        log::debug!("Created pipeline for program {}", program.name);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn encode_pass(&mut self, pass: PendingPass) -> RenderResult<()> {
        let (color_formats, depth_format) = self.target_formats(&pass.target)?;

        let mut keys = Vec::with_capacity(pass.draws.len());
        for draw in &pass.draws {
            let key = PipelineKey {
                program: draw.program,
                state: draw.state,
                color: color_formats.clone(),
                depth_stencil: depth_format,
                mesh: matches!(draw.geometry, Geometry::Mesh(_)),
            };
            self.ensure_pipeline(&key)?;
            keys.push(key);
        }

        let mut sampler_groups = Vec::with_capacity(pass.draws.len());
        for draw in &pass.draws {
            sampler_groups.push(self.sampler_group(draw)?);
        }

        let mut contents = vec![0u8; (self.uniform_stride as usize) * pass.draws.len().max(1)];
        for (i, draw) in pass.draws.iter().enumerate() {
            let offset = i * self.uniform_stride as usize;
            let bytes = bytemuck::bytes_of(&draw.uniforms);
            contents[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("DrawUniformsBuffer"),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DrawUniformsBindGroup"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
        });

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("KernelEncoder"),
                })
        });

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pass
                .target
                .color
                .iter()
                .filter_map(|id| self.textures.get(id))
                .map(|texture| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &texture.view,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: match pass.clear.color {
                                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: f64::from(r),
                                    g: f64::from(g),
                                    b: f64::from(b),
                                    a: f64::from(a),
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();

            let depth_stencil_attachment = pass
                .target
                .depth_stencil
                .and_then(|id| self.textures.get(&id))
                .map(|texture| wgpu::RenderPassDepthStencilAttachment {
                    view: &texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: pass
                            .clear
                            .depth
                            .map(wgpu::LoadOp::Clear)
                            .unwrap_or(wgpu::LoadOp::Load),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: texture.description.format.has_stencil().then(|| {
                        wgpu::Operations {
                            load: pass
                                .clear
                                .stencil
                                .map(wgpu::LoadOp::Clear)
                                .unwrap_or(wgpu::LoadOp::Load),
                            store: wgpu::StoreOp::Store,
                        }
                    }),
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&pass.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (i, draw) in pass.draws.iter().enumerate() {
                let pipeline = self.pipelines.get(&keys[i]).ok_or_else(|| {
                    RenderError::load(format!("pass {}", pass.label), "pipeline was not created")
                })?;
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(
                    0,
                    &uniform_group,
                    &[(i as u64 * self.uniform_stride) as u32],
                );
                if let Some(group) = &sampler_groups[i] {
                    render_pass.set_bind_group(1, group, &[]);
                }
                match draw.state.stencil {
                    StencilMode::Write { reference } | StencilMode::Equal { reference } => {
                        render_pass.set_stencil_reference(u32::from(reference));
                    }
                    StencilMode::Disabled => {}
                }
                let viewport = draw.viewport.unwrap_or(pass.target.area.region());
                render_pass.set_viewport(
                    viewport.x as f32,
                    viewport.y as f32,
                    viewport.width as f32,
                    viewport.height as f32,
                    0.0,
                    1.0,
                );
                match draw.geometry {
                    Geometry::FullscreenTriangle => render_pass.draw(0..3, 0..1),
                    Geometry::Mesh(id) => {
                        let mesh = self.meshes.get(&id).ok_or_else(|| {
                            RenderError::load(format!("mesh {}", id.raw()), "mesh is not live")
                        })?;
                        render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                        render_pass
                            .set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                }
            }
        }

        self.encoder = Some(encoder);
        Ok(())
    }

    fn sampler_group(&mut self, draw: &PendingDraw) -> RenderResult<Option<wgpu::BindGroup>> {
        let program = self.programs.get(&draw.program).ok_or_else(|| {
            RenderError::load(format!("program {}", draw.program.raw()), "program is not live")
        })?;
        if program.samplers.len() != draw.samplers.len() {
            return Err(RenderError::load(
                format!("program {}", program.name),
                format!(
                    "expects {} textures, {} bound",
                    program.samplers.len(),
                    draw.samplers.len()
                ),
            ));
        }
        let slots = program.samplers.clone();
        for (slot, binding) in slots.iter().zip(&draw.samplers) {
            let filter = self.texture_entry(binding.texture)?.description.filter;
            self.ensure_sampler(filter, *slot);
        }

        let Some(program) = self.programs.get(&draw.program) else {
            return Ok(None);
        };
        let Some(layout) = &program.sampler_layout else {
            return Ok(None);
        };

        let mut entries = Vec::with_capacity(slots.len() * 2);
        for (i, (slot, binding)) in slots.iter().zip(&draw.samplers).enumerate() {
            let texture = self.texture_entry(binding.texture)?;
            let filter = match slot {
                SamplerSlot::Depth2D => FilterMode::Nearest,
                _ => texture.description.filter,
            };
            let sampler = self.samplers.get(&(filter, *slot)).ok_or_else(|| {
                RenderError::load("sampler", "sampler was not created")
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: (i * 2) as u32,
                resource: wgpu::BindingResource::TextureView(&texture.sample_view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (i * 2 + 1) as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        Ok(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SamplerBindGroup"),
            layout,
            entries: &entries,
        })))
    }
}

impl GpuBackend for WgpuBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_texture(&mut self, description: &TextureDescription) -> RenderResult<TextureId> {
        Ok(self.allocate_texture(description))
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        let entry = self.textures.remove(&texture).ok_or_else(|| {
            RenderError::load(format!("texture {}", texture.raw()), "texture is not live")
        })?;
        entry.texture.destroy();
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        description: &FramebufferDescription,
    ) -> RenderResult<Framebuffer> {
        for format in description
            .color
            .iter()
            .map(|attachment| attachment.format)
            .chain(description.depth_stencil)
        {
            if !self.capabilities.can_render_to(format) {
                return Err(RenderError::unsupported(
                    "render target format",
                    format!("{format:?} is not renderable on this device"),
                ));
            }
        }

        let color = description
            .color
            .iter()
            .map(|attachment| {
                self.allocate_texture(&TextureDescription {
                    area: description.area,
                    format: attachment.format,
                    kind: TextureKind::D2,
                    filter: attachment.filter,
                })
            })
            .collect();
        let depth_stencil = description.depth_stencil.map(|format| {
            self.allocate_texture(&TextureDescription {
                area: description.area,
                format,
                kind: TextureKind::D2,
                filter: FilterMode::Nearest,
            })
        });
        let framebuffer = Framebuffer {
            id: self.allocate(),
            description: description.clone(),
            color,
            depth_stencil,
        };
        self.framebuffers.insert(framebuffer.id, framebuffer.clone());
        Ok(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: &Framebuffer) -> RenderResult<()> {
        let live = self.framebuffers.remove(&framebuffer.id).ok_or_else(|| {
            RenderError::load(
                format!("framebuffer {}", framebuffer.id.raw()),
                "framebuffer is not live",
            )
        })?;
        for texture in live.color.iter().chain(live.depth_stencil.iter()) {
            self.delete_texture(*texture)?;
        }
        Ok(())
    }

    fn create_program(&mut self, source: &ProgramSource) -> RenderResult<ProgramId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.name),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.as_str().into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::load(
                format!("program {}", source.name),
                error.to_string(),
            ));
        }

        let sampler_layout = (!source.samplers.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = source
                .samplers
                .iter()
                .enumerate()
                .flat_map(|(i, slot)| sampler_layout_entries(i as u32, *slot))
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&source.name),
                    entries: &entries,
                })
        });

        let mut groups = vec![&self.uniform_layout];
        if let Some(layout) = &sampler_layout {
            groups.push(layout);
        }
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&source.name),
                bind_group_layouts: &groups,
                push_constant_ranges: &[],
            });

        let id = self.allocate();
        self.programs.insert(
            id,
            GpuProgram {
                name: source.name.clone(),
                module,
                samplers: source.samplers.clone(),
                sampler_layout,
                layout,
            },
        );
        log::debug!("Compiled program {}", source.name);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        if self.programs.remove(&program).is_none() {
            return Err(RenderError::load(
                format!("program {}", program.raw()),
                "program is not live",
            ));
        }
        self.pipelines.retain(|key, _| key.program != program);
        Ok(())
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshId> {
        mesh.validate()?;
        let vertices = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("MeshVertices"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let indices = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("MeshIndices"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let id = self.allocate();
        self.meshes.insert(
            id,
            GpuMesh {
                vertices,
                indices,
                index_count: mesh.index_count(),
            },
        );
        Ok(id)
    }

    fn delete_mesh(&mut self, mesh: MeshId) -> RenderResult<()> {
        self.meshes
            .remove(&mesh)
            .map(|_| ())
            .ok_or_else(|| RenderError::load(format!("mesh {}", mesh.raw()), "mesh is not live"))
    }

    fn begin_pass(
        &mut self,
        label: &str,
        target: &PassTarget,
        clear: ClearValues,
    ) -> RenderResult<()> {
        if let Some(open) = &self.pending {
            return Err(RenderError::load(
                format!("pass {label}"),
                format!("pass {} is still open", open.label),
            ));
        }
        self.target_formats(target)?;
        self.pending = Some(PendingPass {
            label: label.to_string(),
            target: target.clone(),
            clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        let Some(pass) = self.pending.as_mut() else {
            return Err(RenderError::load("draw", "no pass is open"));
        };
        pass.target.check_feedback(&pass.label, call.samplers)?;
        check_draw_resources(
            call,
            |program| self.programs.contains_key(&program),
            |mesh| self.meshes.contains_key(&mesh),
        )?;
        pass.draws.push(PendingDraw {
            program: call.program,
            geometry: call.geometry,
            state: call.state,
            samplers: call.samplers.to_vec(),
            uniforms: *call.uniforms,
            viewport: call.viewport,
        });
        Ok(())
    }

    fn end_pass(&mut self) -> RenderResult<()> {
        let pass = self
            .pending
            .take()
            .ok_or_else(|| RenderError::load("pass", "no pass is open"))?;
        self.encode_pass(pass)
    }

    fn blit(&mut self, blit: &BlitRegion) -> RenderResult<()> {
        if blit.source_region.area() != blit.target_region.area() {
            return Err(RenderError::unsupported(
                "scaled blit",
                "wgpu copies cannot resize",
            ));
        }
        let attachment = |id: FramebufferId| -> RenderResult<TextureId> {
            self.framebuffers
                .get(&id)
                .and_then(|framebuffer| framebuffer.color_texture(blit.attachment))
                .ok_or_else(|| {
                    RenderError::load(format!("framebuffer {}", id.raw()), "no such attachment")
                })
        };
        let source = attachment(blit.source)?;
        let target = attachment(blit.target)?;

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("KernelEncoder"),
                })
        });
        let (Some(source), Some(target)) = (self.textures.get(&source), self.textures.get(&target))
        else {
            self.encoder = Some(encoder);
            return Err(RenderError::load("blit", "attachment texture is not live"));
        };
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: blit.source_region.x,
                    y: blit.source_region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: blit.target_region.x,
                    y: blit.target_region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: blit.source_region.width,
                height: blit.source_region.height,
                depth_or_array_layers: 1,
            },
        );
        self.encoder = Some(encoder);
        Ok(())
    }

    fn flush(&mut self) -> RenderResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn discard(&mut self) {
        if let Some(pass) = self.pending.take() {
            log::warn!("Discarding open pass {}", pass.label);
        }
        // Dropping an unfinished encoder releases its commands unsubmitted.
        self.encoder = None;
    }
}

/// Rejects a draw whose program or mesh has already been deleted, before it
/// is queued behind the rest of the pass.
fn check_draw_resources(
    call: &DrawCall<'_>,
    program_live: impl Fn(ProgramId) -> bool,
    mesh_live: impl Fn(MeshId) -> bool,
) -> RenderResult<()> {
    if !program_live(call.program) {
        return Err(RenderError::load(
            format!("program {}", call.program.raw()),
            "program is not live",
        ));
    }
    if let Geometry::Mesh(mesh) = call.geometry {
        if !mesh_live(mesh) {
            return Err(RenderError::load(
                format!("mesh {}", mesh.raw()),
                "mesh is not live",
            ));
        }
    }
    Ok(())
}

fn sampler_layout_entries(index: u32, slot: SamplerSlot) -> [wgpu::BindGroupLayoutEntry; 2] {
    let (sample_type, view_dimension, sampler) = match slot {
        SamplerSlot::Color2D => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::Filtering,
        ),
        SamplerSlot::ColorCube => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::Cube,
            wgpu::SamplerBindingType::Filtering,
        ),
        SamplerSlot::Depth2D => (
            wgpu::TextureSampleType::Depth,
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::NonFiltering,
        ),
        SamplerSlot::DepthCompare2D => (
            wgpu::TextureSampleType::Depth,
            wgpu::TextureViewDimension::D2,
            wgpu::SamplerBindingType::Comparison,
        ),
    };
    [
        wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler),
            count: None,
        },
    ]
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rg16F => wgpu::TextureFormat::Rg16Float,
        TextureFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rg32F => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32F => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn to_wgpu_compare(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_state(blend: BlendMode) -> Option<wgpu::BlendState> {
    match blend {
        BlendMode::Replace => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState {
                color: add,
                alpha: add,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_maps_to_a_wgpu_format_with_matching_aspects() {
        for format in [
            TextureFormat::Rgba8,
            TextureFormat::Rg16F,
            TextureFormat::Rgba16F,
            TextureFormat::Rg32F,
            TextureFormat::Rgba32F,
            TextureFormat::Depth32F,
            TextureFormat::Depth24Stencil8,
        ] {
            let wgpu_format = to_wgpu_format(format);
            assert_eq!(wgpu_format.has_depth_aspect(), format.is_depth());
            assert_eq!(wgpu_format.has_stencil_aspect(), format.has_stencil());
        }
    }

    #[test]
    fn replace_blending_disables_the_blend_unit() {
        assert!(blend_state(BlendMode::Replace).is_none());
        let additive = blend_state(BlendMode::Additive).expect("additive blend");
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn draws_against_deleted_resources_are_rejected() {
        let uniforms = DrawUniforms::new();
        let call = DrawCall {
            program: ProgramId::new(1),
            geometry: Geometry::Mesh(MeshId::new(2)),
            state: DrawState::SCREEN,
            samplers: &[],
            uniforms: &uniforms,
            viewport: None,
        };
        assert!(check_draw_resources(&call, |_| true, |_| true).is_ok());

        let err = check_draw_resources(&call, |_| true, |_| false).unwrap_err();
        assert!(matches!(err, RenderError::ResourceLoad { .. }));
        assert!(err.to_string().contains("mesh 2"));

        let err = check_draw_resources(&call, |_| false, |_| true).unwrap_err();
        assert!(err.to_string().contains("program 1"));
    }

    #[test]
    fn sampler_slots_use_interleaved_bindings() {
        let [texture, sampler] = sampler_layout_entries(2, SamplerSlot::DepthCompare2D);
        assert_eq!(texture.binding, 4);
        assert_eq!(sampler.binding, 5);
        assert!(matches!(
            sampler.ty,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        ));
    }
}
