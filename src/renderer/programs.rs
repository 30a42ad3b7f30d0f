//! Program variants, their WGSL sources, and the LRU program cache.
//!
//! A program's source is composed from shared chunks supplied by a
//! [`ShaderLibrary`] plus a generated header declaring the texture bindings
//! and sampling helpers of that exact variant.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use log::{debug, info};

use crate::cache::{CacheLoader, LruCache};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBackend, ProgramId, ProgramSource, SamplerSlot};
use crate::renderer::label::{
    DepthLabel, LightLabel, ShadingLabel, ShadowKind, SurfaceKind, SurfaceLabel,
};
use crate::scene::MaterialMaps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterProgram {
    BlurHorizontal,
    BlurVertical,
    Fog,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKey {
    Shading(ShadingLabel),
    Filter(FilterProgram),
}

impl From<ShadingLabel> for ProgramKey {
    fn from(label: ShadingLabel) -> Self {
        Self::Shading(label)
    }
}

impl From<FilterProgram> for ProgramKey {
    fn from(filter: FilterProgram) -> Self {
        Self::Filter(filter)
    }
}

/// Role of one sampler slot; names the WGSL bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    ShadowMap(ShadowKind),
    Albedo,
    Normal,
    Specular,
    Emission,
    Environment,
    GAlbedo,
    GNormal,
    GSpecular,
    Source,
    Depth,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Self::ShadowMap(_) => "shadow_map",
            Self::Albedo => "albedo",
            Self::Normal => "normal",
            Self::Specular => "specular",
            Self::Emission => "emission",
            Self::Environment => "environment",
            Self::GAlbedo => "g_albedo",
            Self::GNormal => "g_normal",
            Self::GSpecular => "g_specular",
            Self::Source => "source",
            Self::Depth => "depth",
        }
    }

    fn slot(self) -> SamplerSlot {
        match self {
            Self::ShadowMap(ShadowKind::Basic) => SamplerSlot::DepthCompare2D,
            Self::Environment => SamplerSlot::ColorCube,
            Self::Depth => SamplerSlot::Depth2D,
            _ => SamplerSlot::Color2D,
        }
    }
}

fn surface_roles(maps: MaterialMaps, roles: &mut Vec<Role>) {
    for (map, role) in [
        (MaterialMaps::ALBEDO, Role::Albedo),
        (MaterialMaps::NORMAL, Role::Normal),
        (MaterialMaps::SPECULAR, Role::Specular),
        (MaterialMaps::EMISSION, Role::Emission),
        (MaterialMaps::ENVIRONMENT, Role::Environment),
    ] {
        if maps.contains(map) {
            roles.push(role);
        }
    }
}

impl ProgramKey {
    pub fn name(&self) -> String {
        match self {
            Self::Shading(label) => label.to_string(),
            Self::Filter(FilterProgram::BlurHorizontal) => "filter.blur_horizontal".to_owned(),
            Self::Filter(FilterProgram::BlurVertical) => "filter.blur_vertical".to_owned(),
            Self::Filter(FilterProgram::Fog) => "filter.fog".to_owned(),
            Self::Filter(FilterProgram::Copy) => "filter.copy".to_owned(),
        }
    }

    /// Texture roles in binding order. Light textures precede surface maps
    /// because light scopes are opened outside instance scopes.
    fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::new();
        match self {
            Self::Shading(ShadingLabel::Depth(depth)) => {
                if *depth == DepthLabel::Mapped {
                    roles.push(Role::Albedo);
                }
            }
            Self::Shading(ShadingLabel::Shadow(shadow)) => {
                if shadow.depth == DepthLabel::Mapped {
                    roles.push(Role::Albedo);
                }
            }
            Self::Shading(ShadingLabel::Lit(lit)) => {
                roles.extend(lit.light.shadow().map(Role::ShadowMap));
                surface_roles(lit.surface.maps, &mut roles);
            }
            Self::Shading(ShadingLabel::Unlit(surface))
            | Self::Shading(ShadingLabel::Geometry(surface)) => {
                surface_roles(surface.maps, &mut roles);
            }
            Self::Shading(ShadingLabel::DeferredLight(light)) => {
                roles.extend([Role::GAlbedo, Role::GNormal, Role::GSpecular]);
                roles.extend(light.shadow().map(Role::ShadowMap));
            }
            Self::Filter(FilterProgram::Fog) => roles.extend([Role::Source, Role::Depth]),
            Self::Filter(_) => roles.push(Role::Source),
        }
        roles
    }

    /// Sampler slots in binding order; draws must bind textures in the same
    /// order.
    pub fn sampler_slots(&self) -> Vec<SamplerSlot> {
        self.roles().into_iter().map(Role::slot).collect()
    }

    /// Library chunks concatenated after the generated header.
    fn chunks(&self) -> &'static [&'static str] {
        match self {
            Self::Shading(ShadingLabel::Depth(_)) => &["common", "depth"],
            Self::Shading(ShadingLabel::Shadow(shadow)) => match shadow.kind {
                ShadowKind::Basic => &["common", "depth"],
                ShadowKind::BasicPacked | ShadowKind::Variance => &["common", "shadow"],
            },
            Self::Shading(ShadingLabel::Lit(_)) => &["common", "light", "lit"],
            Self::Shading(ShadingLabel::Unlit(_)) => &["common", "unlit"],
            Self::Shading(ShadingLabel::Geometry(_)) => &["common", "geometry"],
            Self::Shading(ShadingLabel::DeferredLight(_)) => {
                &["common", "light", "deferred_light"]
            }
            Self::Filter(FilterProgram::BlurHorizontal | FilterProgram::BlurVertical) => {
                &["common", "blur"]
            }
            Self::Filter(FilterProgram::Fog) => &["common", "fog"],
            Self::Filter(FilterProgram::Copy) => &["common", "copy"],
        }
    }

    /// Full WGSL source of this variant.
    pub fn compose(&self, library: &dyn ShaderLibrary) -> RenderResult<ProgramSource> {
        let roles = self.roles();
        let mut wgsl = String::new();
        self.write_header(&roles, &mut wgsl);
        for chunk in self.chunks() {
            wgsl.push('\n');
            wgsl.push_str(&library.chunk(chunk)?);
        }
        Ok(ProgramSource {
            name: self.name(),
            wgsl,
            samplers: roles.into_iter().map(Role::slot).collect(),
        })
    }

    fn write_header(&self, roles: &[Role], out: &mut String) {
        let _ = writeln!(out, "// {}", self.name());
        for (i, role) in roles.iter().enumerate() {
            let name = role.name();
            let (texture, sampler) = match role.slot() {
                SamplerSlot::Color2D => ("texture_2d<f32>", "sampler"),
                SamplerSlot::ColorCube => ("texture_cube<f32>", "sampler"),
                SamplerSlot::Depth2D => ("texture_depth_2d", "sampler"),
                SamplerSlot::DepthCompare2D => ("texture_depth_2d", "sampler_comparison"),
            };
            let _ = writeln!(
                out,
                "@group(1) @binding({}) var {name}_texture: {texture};",
                i * 2
            );
            let _ = writeln!(
                out,
                "@group(1) @binding({}) var {name}_sampler: {sampler};",
                i * 2 + 1
            );
        }

        let surface = self.surface();
        let alpha_depth = match self {
            Self::Shading(ShadingLabel::Depth(depth)) => *depth != DepthLabel::Constant,
            Self::Shading(ShadingLabel::Shadow(shadow)) => shadow.depth != DepthLabel::Constant,
            _ => surface.kind == SurfaceKind::AlphaDepth,
        };
        let _ = writeln!(out, "const ALPHA_DEPTH: bool = {alpha_depth};");
        write_material_helpers(roles, out);

        let light = self.light();
        let _ = writeln!(
            out,
            "const LIGHT_KIND: u32 = {}u;",
            match light {
                LightLabel::Directional => 0,
                LightLabel::Spherical => 1,
                LightLabel::Projective { .. } => 2,
            }
        );
        write_shadow_helper(light.shadow(), out);

        let (shadow_output, blur_axis) = match self {
            Self::Shading(ShadingLabel::Shadow(shadow)) => {
                (u32::from(shadow.kind == ShadowKind::Variance), "vec2<f32>(0.0, 0.0)")
            }
            Self::Filter(FilterProgram::BlurHorizontal) => (0, "vec2<f32>(1.0, 0.0)"),
            Self::Filter(FilterProgram::BlurVertical) => (0, "vec2<f32>(0.0, 1.0)"),
            _ => (0, "vec2<f32>(0.0, 0.0)"),
        };
        // 0: packed depth, 1: depth moments
        let _ = writeln!(out, "const SHADOW_OUTPUT: u32 = {shadow_output}u;");
        let _ = writeln!(out, "const BLUR_AXIS: vec2<f32> = {blur_axis};");
    }

    fn surface(&self) -> SurfaceLabel {
        match self {
            Self::Shading(ShadingLabel::Lit(lit)) => lit.surface,
            Self::Shading(ShadingLabel::Unlit(surface))
            | Self::Shading(ShadingLabel::Geometry(surface)) => *surface,
            _ => SurfaceLabel {
                kind: SurfaceKind::Regular,
                maps: MaterialMaps::empty(),
            },
        }
    }

    fn light(&self) -> LightLabel {
        match self {
            Self::Shading(ShadingLabel::Lit(lit)) => lit.light,
            Self::Shading(ShadingLabel::DeferredLight(light)) => *light,
            _ => LightLabel::Directional,
        }
    }
}

fn write_material_helpers(roles: &[Role], out: &mut String) {
    let has = |role: Role| roles.contains(&role);
    let sample = |name: &str| format!("textureSample({name}_texture, {name}_sampler, uv)");

    let albedo = if has(Role::Albedo) {
        sample("albedo")
    } else {
        "vec4<f32>(1.0)".to_owned()
    };
    let normal = if has(Role::Normal) {
        format!("{}.xyz * 2.0 - vec3<f32>(1.0)", sample("normal"))
    } else {
        "vec3<f32>(0.0, 0.0, 1.0)".to_owned()
    };
    let specular = if has(Role::Specular) {
        format!("{}.rgb", sample("specular"))
    } else {
        "vec3<f32>(1.0)".to_owned()
    };
    let emission = if has(Role::Emission) {
        format!("{}.rgb", sample("emission"))
    } else {
        "vec3<f32>(1.0)".to_owned()
    };
    let environment = if has(Role::Environment) {
        "textureSample(environment_texture, environment_sampler, direction).rgb".to_owned()
    } else {
        "vec3<f32>(0.0)".to_owned()
    };

    let _ = writeln!(out, "const HAS_NORMAL_MAP: bool = {};", has(Role::Normal));
    let _ = writeln!(out, "const HAS_ENVIRONMENT: bool = {};", has(Role::Environment));
    let _ = writeln!(out, "fn material_albedo(uv: vec2<f32>) -> vec4<f32> {{ return {albedo}; }}");
    let _ = writeln!(out, "fn material_normal(uv: vec2<f32>) -> vec3<f32> {{ return {normal}; }}");
    let _ = writeln!(out, "fn material_specular(uv: vec2<f32>) -> vec3<f32> {{ return {specular}; }}");
    let _ = writeln!(out, "fn material_emission(uv: vec2<f32>) -> vec3<f32> {{ return {emission}; }}");
    let _ = writeln!(
        out,
        "fn material_environment(direction: vec3<f32>) -> vec3<f32> {{ return {environment}; }}"
    );
}

fn write_shadow_helper(shadow: Option<ShadowKind>, out: &mut String) {
    let body = match shadow {
        None => "return 1.0;",
        Some(ShadowKind::Basic) => {
            "return textureSampleCompareLevel(shadow_map_texture, shadow_map_sampler, uv, depth - u.shadow.x);"
        }
        Some(ShadowKind::BasicPacked) => {
            "let stored = unpack_depth(textureSampleLevel(shadow_map_texture, shadow_map_sampler, uv, 0.0));\n    return select(0.0, 1.0, depth - u.shadow.x <= stored);"
        }
        Some(ShadowKind::Variance) => {
            "let moments = textureSampleLevel(shadow_map_texture, shadow_map_sampler, uv, 0.0).xy;\n    return chebyshev_upper_bound(moments, depth, u.shadow.y, u.shadow.z);"
        }
    };
    let _ = writeln!(
        out,
        "fn sample_shadow(uv: vec2<f32>, depth: f32) -> f32 {{\n    {body}\n}}"
    );
}

/// Source of named WGSL chunks.
pub trait ShaderLibrary {
    fn chunk(&self, name: &str) -> RenderResult<Cow<'_, str>>;
}

/// Chunks held in memory. [`MemoryShaderLibrary::builtin`] carries the
/// sources shipped with the crate.
#[derive(Debug, Clone, Default)]
pub struct MemoryShaderLibrary {
    chunks: HashMap<String, String>,
}

impl MemoryShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (name, source) in [
            ("common", include_str!("../shader/common.wgsl")),
            ("light", include_str!("../shader/light.wgsl")),
            ("depth", include_str!("../shader/depth.wgsl")),
            ("shadow", include_str!("../shader/shadow.wgsl")),
            ("lit", include_str!("../shader/lit.wgsl")),
            ("unlit", include_str!("../shader/unlit.wgsl")),
            ("geometry", include_str!("../shader/geometry.wgsl")),
            ("deferred_light", include_str!("../shader/deferred_light.wgsl")),
            ("blur", include_str!("../shader/blur.wgsl")),
            ("fog", include_str!("../shader/fog.wgsl")),
            ("copy", include_str!("../shader/copy.wgsl")),
        ] {
            library.insert(name, source);
        }
        library
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.chunks.insert(name.into(), source.into());
    }
}

impl ShaderLibrary for MemoryShaderLibrary {
    fn chunk(&self, name: &str) -> RenderResult<Cow<'_, str>> {
        self.chunks
            .get(name)
            .map(|source| Cow::Borrowed(source.as_str()))
            .ok_or_else(|| RenderError::load(format!("shader chunk {name}"), "not in library"))
    }
}

/// Reads `<root>/<chunk>.wgsl` on every request, so edited shaders are
/// picked up the next time a program is loaded.
#[derive(Debug, Clone)]
pub struct DirectoryShaderLibrary {
    root: PathBuf,
}

impl DirectoryShaderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderLibrary for DirectoryShaderLibrary {
    fn chunk(&self, name: &str) -> RenderResult<Cow<'_, str>> {
        let path = self.root.join(format!("{name}.wgsl"));
        let source = fs::read_to_string(&path)?;
        debug!("Read shader chunk {:?}", path);
        Ok(Cow::Owned(source))
    }
}

pub struct ProgramLoader {
    library: Box<dyn ShaderLibrary>,
}

impl ProgramLoader {
    pub fn new(library: Box<dyn ShaderLibrary>) -> Self {
        Self { library }
    }
}

impl CacheLoader for ProgramLoader {
    type Key = ProgramKey;
    type Value = ProgramId;
    type Context = dyn GpuBackend;

    fn load(&mut self, backend: &mut Self::Context, key: &ProgramKey) -> RenderResult<ProgramId> {
        let source = key.compose(self.library.as_ref())?;
        let program = backend.create_program(&source)?;
        info!("Loaded program {}", source.name);
        Ok(program)
    }

    fn close(
        &mut self,
        backend: &mut Self::Context,
        _key: &ProgramKey,
        program: ProgramId,
    ) -> RenderResult<()> {
        backend.delete_program(program)
    }

    /// Programs are counted, not measured.
    fn size_of(&self, _key: &ProgramKey, _program: &ProgramId) -> u64 {
        1
    }
}

pub type ProgramCache = LruCache<ProgramLoader>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;
    use crate::renderer::label::{LitLabel, ShadowLabel};

    fn lit(maps: MaterialMaps, shadow: Option<ShadowKind>) -> ProgramKey {
        ProgramKey::Shading(ShadingLabel::Lit(LitLabel {
            surface: SurfaceLabel {
                kind: SurfaceKind::Regular,
                maps,
            },
            light: LightLabel::Projective { shadow },
        }))
    }

    #[test]
    fn shadow_map_slot_precedes_material_maps() {
        let key = lit(MaterialMaps::ALBEDO | MaterialMaps::ENVIRONMENT, Some(ShadowKind::Basic));
        assert_eq!(
            key.sampler_slots(),
            vec![
                SamplerSlot::DepthCompare2D,
                SamplerSlot::Color2D,
                SamplerSlot::ColorCube
            ]
        );
    }

    #[test]
    fn composed_source_declares_each_binding() {
        let key = lit(MaterialMaps::NORMAL, Some(ShadowKind::Variance));
        let source = key.compose(&MemoryShaderLibrary::builtin()).unwrap();
        assert!(source.wgsl.contains("@group(1) @binding(0) var shadow_map_texture: texture_2d<f32>;"));
        assert!(source.wgsl.contains("@group(1) @binding(3) var normal_sampler: sampler;"));
        assert!(source.wgsl.contains("const HAS_NORMAL_MAP: bool = true;"));
        assert!(source.wgsl.contains("fn vs_main"));
        assert_eq!(source.samplers.len(), 2);
    }

    #[test]
    fn basic_shadow_programs_reuse_the_depth_chunk() {
        let key = ProgramKey::Shading(ShadingLabel::Shadow(ShadowLabel {
            depth: DepthLabel::Uniform,
            kind: ShadowKind::Basic,
        }));
        let mut library = MemoryShaderLibrary::new();
        library.insert("common", "// common");
        library.insert("depth", "// depth");
        let source = key.compose(&library).unwrap();
        assert!(source.wgsl.ends_with("// depth"));
        assert!(source.wgsl.contains("const ALPHA_DEPTH: bool = true;"));
        assert!(source.samplers.is_empty());
    }

    #[test]
    fn missing_chunk_is_a_load_error() {
        let key = ProgramKey::Filter(FilterProgram::Copy);
        let err = key.compose(&MemoryShaderLibrary::new()).unwrap_err();
        assert!(matches!(err, RenderError::ResourceLoad { .. }));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let library = DirectoryShaderLibrary::new("does/not/exist");
        assert!(matches!(library.chunk("common"), Err(RenderError::Io(_))));
    }

    #[test]
    fn cache_compiles_each_variant_once() {
        let mut backend = RecordingBackend::default();
        let mut cache = ProgramCache::new(
            ProgramLoader::new(Box::new(MemoryShaderLibrary::builtin())),
            8,
        );
        let key = ProgramKey::Filter(FilterProgram::BlurHorizontal);
        let first = *cache.get(&mut backend, &key).unwrap();
        let second = *cache.get(&mut backend, &key).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.program_creations(), 1);
        assert_eq!(backend.program_name(first), Some("filter.blur_horizontal"));
        cache.clear(&mut backend);
        assert_eq!(backend.live_programs(), 0);
    }
}
