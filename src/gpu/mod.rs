//! The contract between the frame pipeline and a graphics API.
//!
//! The pipeline only needs allocation/deletion for each resource kind, a
//! region copy, and a way to run a program over geometry inside a pass. Two
//! implementations ship with the crate: [`RecordingBackend`] (headless, keeps
//! a command log) and [`WgpuBackend`].

pub mod handle;
pub mod recording;
pub mod uniforms;
pub mod vertex;
pub mod wgpu_backend;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

pub use handle::{
    FramebufferId, FramebufferResource, Handle, MeshId, MeshResource, ProgramId, ProgramResource,
    TextureId, TextureResource,
};
pub use recording::{GpuCommand, RecordingBackend};
pub use uniforms::DrawUniforms;
pub use vertex::{MeshData, Vertex};
pub use wgpu_backend::WgpuBackend;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        /// Depth attachments can be sampled as textures.
        const DEPTH_TEXTURES = 1 << 0;
        /// 32-bit float color formats are renderable.
        const FLOAT_COLOR_TARGETS = 1 << 1;
        /// 16-bit float color formats are renderable.
        const HALF_FLOAT_COLOR_TARGETS = 1 << 2;
        const STENCIL = 1 << 3;
        /// Same-size region copies between framebuffers.
        const REGION_BLIT = 1 << 4;
        /// Region copies that resize while copying.
        const SCALED_BLIT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub flags: CapabilityFlags,
    pub texture_units: u32,
}

impl Capabilities {
    pub fn new(flags: CapabilityFlags, texture_units: u32) -> Self {
        Self {
            flags,
            texture_units,
        }
    }

    pub fn supports(&self, flag: CapabilityFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn require(
        &self,
        flag: CapabilityFlags,
        feature: &'static str,
        reason: &str,
    ) -> RenderResult<()> {
        if self.supports(flag) {
            Ok(())
        } else {
            Err(RenderError::unsupported(feature, reason))
        }
    }

    /// Whether a color attachment of `format` can be rendered to.
    pub fn can_render_to(&self, format: TextureFormat) -> bool {
        if format.is_depth() {
            return !format.has_stencil() || self.supports(CapabilityFlags::STENCIL);
        }
        if format.is_half_float() {
            return self.supports(CapabilityFlags::HALF_FLOAT_COLOR_TARGETS);
        }
        if format.is_float() {
            return self.supports(CapabilityFlags::FLOAT_COLOR_TARGETS);
        }
        true
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new(CapabilityFlags::all(), 16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8,
    Rg16F,
    Rgba16F,
    Rg32F,
    Rgba32F,
    Depth32F,
    Depth24Stencil8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Rgba8 | Self::Rg16F | Self::Depth32F | Self::Depth24Stencil8 => 4,
            Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgba32F => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32F | Self::Depth24Stencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Rg32F | Self::Rgba32F)
    }

    pub fn is_half_float(self) -> bool {
        matches!(self, Self::Rg16F | Self::Rgba16F)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureKind {
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Area {
    pub width: u32,
    pub height: u32,
}

impl Area {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn pixels(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Scales both dimensions, never going below one pixel.
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(
            ((self.width as f32 * factor) as u32).max(1),
            ((self.height as f32 * factor) as u32).max(1),
        )
    }

    pub fn region(self) -> Region {
        Region::new(0, 0, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> Area {
        Area::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescription {
    pub area: Area,
    pub format: TextureFormat,
    pub kind: TextureKind,
    pub filter: FilterMode,
}

impl TextureDescription {
    pub fn size_bytes(&self) -> u64 {
        let faces = match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        };
        self.area.pixels() * self.format.bytes_per_pixel() * faces
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorAttachment {
    pub format: TextureFormat,
    pub filter: FilterMode,
}

/// Structural description of a framebuffer; two equal descriptions are
/// interchangeable, which is what lets pooled scratch buffers be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDescription {
    pub area: Area,
    pub color: Vec<ColorAttachment>,
    pub depth_stencil: Option<TextureFormat>,
}

impl FramebufferDescription {
    pub fn new(area: Area) -> Self {
        Self {
            area,
            color: Vec::new(),
            depth_stencil: None,
        }
    }

    pub fn color(area: Area, format: TextureFormat, filter: FilterMode) -> Self {
        Self::new(area).with_color(format, filter)
    }

    pub fn with_color(mut self, format: TextureFormat, filter: FilterMode) -> Self {
        self.color.push(ColorAttachment { format, filter });
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_stencil = Some(format);
        self
    }

    pub fn size_bytes(&self) -> u64 {
        let per_pixel: u64 = self
            .color
            .iter()
            .map(|attachment| attachment.format.bytes_per_pixel())
            .chain(self.depth_stencil.map(TextureFormat::bytes_per_pixel))
            .sum();
        self.area.pixels() * per_pixel
    }
}

/// A live framebuffer together with the textures backing its attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub id: FramebufferId,
    pub description: FramebufferDescription,
    pub color: Vec<TextureId>,
    pub depth_stencil: Option<TextureId>,
}

impl Framebuffer {
    pub fn area(&self) -> Area {
        self.description.area
    }

    pub fn color_texture(&self, index: usize) -> Option<TextureId> {
        self.color.get(index).copied()
    }

    pub fn target(&self) -> PassTarget {
        PassTarget {
            area: self.description.area,
            color: self.color.clone(),
            depth_stencil: self.depth_stencil,
        }
    }
}

/// The attachments a pass renders into. Attachments may come from different
/// framebuffers as long as their areas match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTarget {
    pub area: Area,
    pub color: Vec<TextureId>,
    pub depth_stencil: Option<TextureId>,
}

impl PassTarget {
    /// Whether `texture` is written by this pass and so cannot be sampled in it.
    pub fn attaches(&self, texture: TextureId) -> bool {
        self.color.contains(&texture) || self.depth_stencil == Some(texture)
    }

    /// Fails if any bound texture is also one of this pass's attachments.
    pub fn check_feedback(&self, label: &str, samplers: &[SamplerBinding]) -> RenderResult<()> {
        match samplers.iter().find(|binding| self.attaches(binding.texture)) {
            Some(binding) => Err(RenderError::load(
                format!("texture {}", binding.texture.raw()),
                format!("sampled while attached to pass {label}"),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearValues {
    pub const LOAD: Self = Self {
        color: None,
        depth: None,
        stencil: None,
    };

    pub fn all(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }

    pub fn color(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            ..Self::LOAD
        }
    }

    pub fn depth(depth: f32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::LOAD
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    Additive,
    Premultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthMode {
    /// `None` disables the depth test entirely.
    pub compare: Option<CompareFunction>,
    pub write: bool,
}

impl DepthMode {
    pub const DISABLED: Self = Self {
        compare: None,
        write: false,
    };

    pub const WRITE: Self = Self {
        compare: Some(CompareFunction::LessEqual),
        write: true,
    };

    pub const TEST: Self = Self {
        compare: Some(CompareFunction::LessEqual),
        write: false,
    };

    pub const EQUAL: Self = Self {
        compare: Some(CompareFunction::Equal),
        write: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Always passes and replaces the stored value with `reference`.
    Write { reference: u8 },
    /// Passes only where the stored value equals `reference`.
    Equal { reference: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceCulling {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawState {
    pub blend: BlendMode,
    pub depth: DepthMode,
    pub stencil: StencilMode,
    pub cull: FaceCulling,
    pub color_write: bool,
}

impl DrawState {
    pub const OPAQUE: Self = Self {
        blend: BlendMode::Replace,
        depth: DepthMode::WRITE,
        stencil: StencilMode::Disabled,
        cull: FaceCulling::Back,
        color_write: true,
    };

    pub const DEPTH_ONLY: Self = Self {
        color_write: false,
        ..Self::OPAQUE
    };

    /// Full-screen passes: no depth, no culling.
    pub const SCREEN: Self = Self {
        blend: BlendMode::Replace,
        depth: DepthMode::DISABLED,
        stencil: StencilMode::Disabled,
        cull: FaceCulling::None,
        color_write: true,
    };

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth(mut self, depth: DepthMode) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_stencil(mut self, stencil: StencilMode) -> Self {
        self.stencil = stencil;
        self
    }

    pub fn with_cull(mut self, cull: FaceCulling) -> Self {
        self.cull = cull;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Geometry {
    Mesh(MeshId),
    /// A single triangle covering the viewport, generated in the vertex stage.
    FullscreenTriangle,
}

/// How a program samples the texture bound in one of its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerSlot {
    Color2D,
    ColorCube,
    Depth2D,
    /// Depth texture sampled with a `LessEqual` comparison sampler.
    DepthCompare2D,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub name: String,
    pub wgsl: String,
    pub samplers: Vec<SamplerSlot>,
}

/// Texture unit index handed out by the texture-unit allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerBinding {
    pub unit: TextureUnit,
    pub texture: TextureId,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub geometry: Geometry,
    pub state: DrawState,
    /// Bound textures in the program's declared slot order.
    pub samplers: &'a [SamplerBinding],
    pub uniforms: &'a DrawUniforms,
    pub viewport: Option<Region>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRegion {
    pub source: FramebufferId,
    pub source_region: Region,
    pub target: FramebufferId,
    pub target_region: Region,
    /// Color attachment index copied in both framebuffers.
    pub attachment: usize,
    pub filter: FilterMode,
}

/// Resource allocation and command submission for one graphics device.
///
/// All calls happen on one thread, in frame order. Passes are bracketed by
/// [`GpuBackend::begin_pass`] and [`GpuBackend::end_pass`]; draws outside a
/// pass are an error.
pub trait GpuBackend {
    fn capabilities(&self) -> Capabilities;

    fn create_texture(&mut self, description: &TextureDescription) -> RenderResult<TextureId>;
    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()>;

    fn create_framebuffer(
        &mut self,
        description: &FramebufferDescription,
    ) -> RenderResult<Framebuffer>;
    fn delete_framebuffer(&mut self, framebuffer: &Framebuffer) -> RenderResult<()>;

    fn create_program(&mut self, source: &ProgramSource) -> RenderResult<ProgramId>;
    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()>;

    fn create_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshId>;
    fn delete_mesh(&mut self, mesh: MeshId) -> RenderResult<()>;

    fn begin_pass(&mut self, label: &str, target: &PassTarget, clear: ClearValues)
        -> RenderResult<()>;
    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()>;
    fn end_pass(&mut self) -> RenderResult<()>;

    fn blit(&mut self, blit: &BlitRegion) -> RenderResult<()>;

    /// Submits everything recorded since the last flush.
    fn flush(&mut self) -> RenderResult<()>;

    /// Drops everything recorded since the last flush without submitting it,
    /// closing an open pass. Used when a frame aborts.
    fn discard(&mut self);
}
