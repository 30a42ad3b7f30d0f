use bitflags::bitflags;

use crate::gpu::{BlendMode, TextureId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        /// Ignores lights; drawn once with its own color and emission.
        const UNLIT = 1 << 0;
        /// Fragments below `alpha_threshold` are discarded, including from
        /// the depth and shadow passes.
        const ALPHA_DEPTH = 1 << 1;
        /// Drawn after all opaque content with `blend`.
        const TRANSLUCENT = 1 << 2;
    }
}

bitflags! {
    /// Texture maps a material samples. Part of the shading label, so it
    /// orders and hashes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct MaterialMaps: u8 {
        const ALBEDO = 1 << 0;
        const NORMAL = 1 << 1;
        const SPECULAR = 1 << 2;
        const EMISSION = 1 << 3;
        const ENVIRONMENT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color: [f32; 4],
    pub flags: MaterialFlags,

    pub albedo_texture: Option<TextureId>,
    pub normal_texture: Option<TextureId>,
    pub specular_texture: Option<TextureId>,
    pub emission_texture: Option<TextureId>,
    /// Cube map for reflections.
    pub environment_texture: Option<TextureId>,

    pub alpha_threshold: f32,
    pub specular_exponent: f32,
    pub specular_intensity: f32,
    pub emission_level: f32,
    pub blend: BlendMode,
}

impl Material {
    pub fn new(color: [f32; 4]) -> Self {
        Self {
            base_color: color,
            flags: MaterialFlags::empty(),
            albedo_texture: None,
            normal_texture: None,
            specular_texture: None,
            emission_texture: None,
            environment_texture: None,
            alpha_threshold: 0.5,
            specular_exponent: 32.0,
            specular_intensity: 0.5,
            emission_level: 0.0,
            blend: BlendMode::Alpha,
        }
    }

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new([r, g, b, 1.0])
    }

    pub fn white() -> Self {
        Self::rgb(1.0, 1.0, 1.0)
    }

    pub fn unlit(mut self) -> Self {
        self.flags |= MaterialFlags::UNLIT;
        self
    }

    pub fn with_alpha_depth(mut self, threshold: f32) -> Self {
        self.alpha_threshold = threshold.clamp(0.0, 1.0);
        self.flags |= MaterialFlags::ALPHA_DEPTH;
        self
    }

    pub fn translucent(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self.flags |= MaterialFlags::TRANSLUCENT;
        self
    }

    pub fn with_albedo_texture(mut self, texture: TextureId) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    pub fn with_normal_texture(mut self, texture: TextureId) -> Self {
        self.normal_texture = Some(texture);
        self
    }

    pub fn with_specular_texture(mut self, texture: TextureId) -> Self {
        self.specular_texture = Some(texture);
        self
    }

    pub fn with_emission_texture(mut self, texture: TextureId) -> Self {
        self.emission_texture = Some(texture);
        self
    }

    pub fn with_environment_texture(mut self, texture: TextureId) -> Self {
        self.environment_texture = Some(texture);
        self
    }

    pub fn with_specular(mut self, exponent: f32, intensity: f32) -> Self {
        self.specular_exponent = exponent.max(1.0);
        self.specular_intensity = intensity.max(0.0);
        self
    }

    pub fn with_emission(mut self, level: f32) -> Self {
        self.emission_level = level.max(0.0);
        self
    }

    pub fn is_translucent(&self) -> bool {
        self.flags.contains(MaterialFlags::TRANSLUCENT)
    }

    pub fn is_unlit(&self) -> bool {
        self.flags.contains(MaterialFlags::UNLIT)
    }

    pub fn maps(&self) -> MaterialMaps {
        let mut maps = MaterialMaps::empty();
        maps.set(MaterialMaps::ALBEDO, self.albedo_texture.is_some());
        maps.set(MaterialMaps::NORMAL, self.normal_texture.is_some());
        maps.set(MaterialMaps::SPECULAR, self.specular_texture.is_some());
        maps.set(MaterialMaps::EMISSION, self.emission_texture.is_some());
        maps.set(MaterialMaps::ENVIRONMENT, self.environment_texture.is_some());
        maps
    }

    /// 2D textures in the order the material programs declare them,
    /// followed by the environment cube if any.
    pub fn textures_2d(&self) -> impl Iterator<Item = TextureId> + '_ {
        [
            self.albedo_texture,
            self.normal_texture,
            self.specular_texture,
            self.emission_texture,
        ]
        .into_iter()
        .flatten()
    }

    /// alpha threshold, specular exponent, emission, specular intensity
    pub fn parameters(&self) -> [f32; 4] {
        [
            self.alpha_threshold,
            self.specular_exponent,
            self.emission_level,
            self.specular_intensity,
        ]
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::white()
    }
}
