//! Headless backend that validates calls and keeps a log of everything it was
//! asked to do.

use std::collections::{HashMap, HashSet};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    BlitRegion, Capabilities, ClearValues, DrawCall, DrawState, Framebuffer,
    FramebufferDescription, FramebufferId, Geometry, GpuBackend, MeshData, MeshId, PassTarget,
    ProgramId, ProgramSource, Region, SamplerBinding, TextureDescription, TextureFormat,
    TextureId, TextureKind,
};

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateTexture {
        texture: TextureId,
        description: TextureDescription,
    },
    DeleteTexture {
        texture: TextureId,
    },
    CreateFramebuffer {
        framebuffer: FramebufferId,
        description: FramebufferDescription,
    },
    DeleteFramebuffer {
        framebuffer: FramebufferId,
    },
    CreateProgram {
        program: ProgramId,
        name: String,
    },
    DeleteProgram {
        program: ProgramId,
    },
    CreateMesh {
        mesh: MeshId,
    },
    DeleteMesh {
        mesh: MeshId,
    },
    BeginPass {
        label: String,
        target: PassTarget,
        clear: ClearValues,
    },
    Draw {
        program: ProgramId,
        geometry: Geometry,
        state: DrawState,
        samplers: Vec<SamplerBinding>,
        viewport: Option<Region>,
    },
    EndPass,
    Blit(BlitRegion),
    Flush,
    /// Recorded work since the last flush was dropped.
    Discard,
}

pub struct RecordingBackend {
    capabilities: Capabilities,
    commands: Vec<GpuCommand>,
    next_id: u32,
    textures: HashMap<TextureId, TextureDescription>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    programs: HashMap<ProgramId, String>,
    meshes: HashSet<MeshId>,
    current_pass: Option<(String, PassTarget)>,
    failing_programs: HashSet<String>,
    failing_formats: HashSet<TextureFormat>,
}

impl RecordingBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            commands: Vec::new(),
            next_id: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashSet::new(),
            current_pass: None,
            failing_programs: HashSet::new(),
            failing_formats: HashSet::new(),
        }
    }

    /// Makes every subsequent `create_program` for `name` fail.
    pub fn fail_program(&mut self, name: impl Into<String>) {
        self.failing_programs.insert(name.into());
    }

    pub fn clear_failures(&mut self) {
        self.failing_programs.clear();
        self.failing_formats.clear();
    }

    /// Makes texture or framebuffer creation with `format` fail.
    pub fn fail_format(&mut self, format: TextureFormat) {
        self.failing_formats.insert(format);
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of every pass begun, in order.
    pub fn pass_labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::BeginPass { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Draw commands grouped under the label of the pass that contains them.
    pub fn draws_by_pass(&self) -> Vec<(&str, Vec<&GpuCommand>)> {
        let mut passes: Vec<(&str, Vec<&GpuCommand>)> = Vec::new();
        for command in &self.commands {
            match command {
                GpuCommand::BeginPass { label, .. } => passes.push((label.as_str(), Vec::new())),
                GpuCommand::Draw { .. } => {
                    if let Some((_, draws)) = passes.last_mut() {
                        draws.push(command);
                    }
                }
                _ => {}
            }
        }
        passes
    }

    pub fn count(&self, predicate: impl Fn(&GpuCommand) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    pub fn framebuffer_creations(&self) -> usize {
        self.count(|command| matches!(command, GpuCommand::CreateFramebuffer { .. }))
    }

    pub fn program_creations(&self) -> usize {
        self.count(|command| matches!(command, GpuCommand::CreateProgram { .. }))
    }

    pub fn program_name(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(String::as_str)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn in_pass(&self) -> bool {
        self.current_pass.is_some()
    }

    fn allocate<T>(&mut self) -> crate::gpu::Handle<T> {
        let id = crate::gpu::Handle::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn check_texture(&self, texture: TextureId) -> RenderResult<()> {
        if self.textures.contains_key(&texture) {
            Ok(())
        } else {
            Err(RenderError::load(
                format!("texture {}", texture.raw()),
                "texture is not live",
            ))
        }
    }

    fn check_format(&self, format: TextureFormat) -> RenderResult<()> {
        if self.failing_formats.contains(&format) {
            return Err(RenderError::load(
                format!("{format:?} texture"),
                "allocation failed",
            ));
        }
        if !self.capabilities.can_render_to(format) {
            return Err(RenderError::unsupported(
                "render target format",
                format!("{format:?} is not renderable on this backend"),
            ));
        }
        Ok(())
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl GpuBackend for RecordingBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_texture(&mut self, description: &TextureDescription) -> RenderResult<TextureId> {
        if self.failing_formats.contains(&description.format) {
            return Err(RenderError::load(
                format!("{:?} texture", description.format),
                "allocation failed",
            ));
        }
        let texture = self.allocate();
        self.textures.insert(texture, description.clone());
        self.commands.push(GpuCommand::CreateTexture {
            texture,
            description: description.clone(),
        });
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.check_texture(texture)?;
        self.textures.remove(&texture);
        self.commands.push(GpuCommand::DeleteTexture { texture });
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        description: &FramebufferDescription,
    ) -> RenderResult<Framebuffer> {
        for attachment in &description.color {
            self.check_format(attachment.format)?;
        }
        if let Some(format) = description.depth_stencil {
            self.check_format(format)?;
        }

        let framebuffer_id = self.allocate();
        let mut color = Vec::with_capacity(description.color.len());
        for attachment in &description.color {
            let texture = self.allocate();
            self.textures.insert(
                texture,
                TextureDescription {
                    area: description.area,
                    format: attachment.format,
                    kind: TextureKind::D2,
                    filter: attachment.filter,
                },
            );
            color.push(texture);
        }
        let depth_stencil = description.depth_stencil.map(|format| {
            let texture = self.allocate();
            self.textures.insert(
                texture,
                TextureDescription {
                    area: description.area,
                    format,
                    kind: TextureKind::D2,
                    filter: crate::gpu::FilterMode::Nearest,
                },
            );
            texture
        });

        let framebuffer = Framebuffer {
            id: framebuffer_id,
            description: description.clone(),
            color,
            depth_stencil,
        };
        self.framebuffers.insert(framebuffer_id, framebuffer.clone());
        self.commands.push(GpuCommand::CreateFramebuffer {
            framebuffer: framebuffer_id,
            description: description.clone(),
        });
        Ok(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: &Framebuffer) -> RenderResult<()> {
        let Some(live) = self.framebuffers.remove(&framebuffer.id) else {
            return Err(RenderError::load(
                format!("framebuffer {}", framebuffer.id.raw()),
                "framebuffer is not live",
            ));
        };
        for texture in live.color.iter().chain(live.depth_stencil.iter()) {
            self.textures.remove(texture);
        }
        self.commands.push(GpuCommand::DeleteFramebuffer {
            framebuffer: framebuffer.id,
        });
        Ok(())
    }

    fn create_program(&mut self, source: &ProgramSource) -> RenderResult<ProgramId> {
        if self.failing_programs.contains(&source.name) {
            return Err(RenderError::load(
                format!("program {}", source.name),
                "compilation failed",
            ));
        }
        let program = self.allocate();
        self.programs.insert(program, source.name.clone());
        self.commands.push(GpuCommand::CreateProgram {
            program,
            name: source.name.clone(),
        });
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        if self.programs.remove(&program).is_none() {
            return Err(RenderError::load(
                format!("program {}", program.raw()),
                "program is not live",
            ));
        }
        self.commands.push(GpuCommand::DeleteProgram { program });
        Ok(())
    }

    fn create_mesh(&mut self, data: &MeshData) -> RenderResult<MeshId> {
        data.validate()?;
        let mesh = self.allocate();
        self.meshes.insert(mesh);
        self.commands.push(GpuCommand::CreateMesh { mesh });
        Ok(mesh)
    }

    fn delete_mesh(&mut self, mesh: MeshId) -> RenderResult<()> {
        if !self.meshes.remove(&mesh) {
            return Err(RenderError::load(
                format!("mesh {}", mesh.raw()),
                "mesh is not live",
            ));
        }
        self.commands.push(GpuCommand::DeleteMesh { mesh });
        Ok(())
    }

    fn begin_pass(
        &mut self,
        label: &str,
        target: &PassTarget,
        clear: ClearValues,
    ) -> RenderResult<()> {
        if let Some((open, _)) = &self.current_pass {
            return Err(RenderError::load(
                format!("pass {label}"),
                format!("pass {open} is still open"),
            ));
        }
        for texture in target.color.iter().chain(target.depth_stencil.iter()) {
            self.check_texture(*texture)?;
        }
        self.current_pass = Some((label.to_string(), target.clone()));
        self.commands.push(GpuCommand::BeginPass {
            label: label.to_string(),
            target: target.clone(),
            clear,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        let Some((label, target)) = &self.current_pass else {
            return Err(RenderError::load("draw", "no pass is open"));
        };
        target.check_feedback(label, call.samplers)?;
        if !self.programs.contains_key(&call.program) {
            return Err(RenderError::load(
                format!("program {}", call.program.raw()),
                "program is not live",
            ));
        }
        if let Geometry::Mesh(mesh) = call.geometry {
            if !self.meshes.contains(&mesh) {
                return Err(RenderError::load(
                    format!("mesh {}", mesh.raw()),
                    "mesh is not live",
                ));
            }
        }
        for binding in call.samplers {
            if binding.unit.0 >= self.capabilities.texture_units {
                return Err(RenderError::InsufficientUnits {
                    requested: binding.unit.0,
                    available: self.capabilities.texture_units,
                });
            }
            self.check_texture(binding.texture)?;
        }
        self.commands.push(GpuCommand::Draw {
            program: call.program,
            geometry: call.geometry,
            state: call.state,
            samplers: call.samplers.to_vec(),
            viewport: call.viewport,
        });
        Ok(())
    }

    fn end_pass(&mut self) -> RenderResult<()> {
        if self.current_pass.take().is_none() {
            return Err(RenderError::load("pass", "no pass is open"));
        }
        self.commands.push(GpuCommand::EndPass);
        Ok(())
    }

    fn blit(&mut self, blit: &BlitRegion) -> RenderResult<()> {
        let scaled = blit.source_region.area() != blit.target_region.area();
        let flag = if scaled {
            crate::gpu::CapabilityFlags::SCALED_BLIT
        } else {
            crate::gpu::CapabilityFlags::REGION_BLIT
        };
        self.capabilities
            .require(flag, "blit", "region copy is not supported")?;
        for id in [blit.source, blit.target] {
            if !self.framebuffers.contains_key(&id) {
                return Err(RenderError::load(
                    format!("framebuffer {}", id.raw()),
                    "framebuffer is not live",
                ));
            }
        }
        self.commands.push(GpuCommand::Blit(*blit));
        Ok(())
    }

    fn flush(&mut self) -> RenderResult<()> {
        self.commands.push(GpuCommand::Flush);
        Ok(())
    }

    fn discard(&mut self) {
        self.current_pass = None;
        self.commands.push(GpuCommand::Discard);
    }
}
