//! Shading labels: small tags selecting the program variant an instance
//! needs. Equal labels can share one bound program.

use std::fmt;

use crate::gpu::{CapabilityFlags, Capabilities};
use crate::scene::{Light, Material, MaterialFlags, MaterialMaps, ShadowConfig};

/// How the depth of a surface is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepthLabel {
    /// Every fragment is written.
    Constant,
    /// Fragments are discarded against the material's uniform alpha.
    Uniform,
    /// Fragments are discarded against the albedo map's alpha.
    Mapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SurfaceKind {
    Regular,
    AlphaDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceLabel {
    pub kind: SurfaceKind,
    pub maps: MaterialMaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadowKind {
    /// Depth texture sampled with a comparison sampler.
    Basic,
    /// Depth packed into an RGBA8 color target, for backends that cannot
    /// sample depth textures.
    BasicPacked,
    /// Depth and depth squared in a float target.
    Variance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightLabel {
    Directional,
    Spherical,
    Projective { shadow: Option<ShadowKind> },
}

impl LightLabel {
    pub fn shadow(&self) -> Option<ShadowKind> {
        match self {
            Self::Projective { shadow } => *shadow,
            Self::Directional | Self::Spherical => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowLabel {
    pub depth: DepthLabel,
    pub kind: ShadowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LitLabel {
    pub surface: SurfaceLabel,
    pub light: LightLabel,
}

/// Every label a scene instance or light can be classified under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadingLabel {
    Depth(DepthLabel),
    Shadow(ShadowLabel),
    Lit(LitLabel),
    Unlit(SurfaceLabel),
    /// Deferred attribute pass.
    Geometry(SurfaceLabel),
    /// Deferred full-screen light pass.
    DeferredLight(LightLabel),
}

/// Decision tables mapping materials and lights to labels.
///
/// Implementations must be pure: the same inputs always give the same label.
pub trait LabelDecider {
    fn depth(&self, material: &Material) -> DepthLabel;

    fn surface(&self, material: &Material) -> SurfaceLabel;

    fn light(&self, light: &Light, capabilities: &Capabilities) -> LightLabel;

    fn shadow(
        &self,
        material: &Material,
        config: &ShadowConfig,
        capabilities: &Capabilities,
    ) -> ShadowLabel;

    fn lit(&self, material: &Material, light: &Light, capabilities: &Capabilities) -> LitLabel {
        LitLabel {
            surface: self.surface(material),
            light: self.light(light, capabilities),
        }
    }

    /// Surface label for the deferred attribute pass, which has no use for
    /// environment maps.
    fn geometry(&self, material: &Material) -> SurfaceLabel {
        let mut surface = self.surface(material);
        surface.maps.remove(MaterialMaps::ENVIRONMENT);
        surface
    }
}

/// The built-in decision table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLabels;

impl StandardLabels {
    fn shadow_kind(config: &ShadowConfig, capabilities: &Capabilities) -> ShadowKind {
        match config {
            ShadowConfig::Basic { .. } => {
                if capabilities.supports(CapabilityFlags::DEPTH_TEXTURES) {
                    ShadowKind::Basic
                } else {
                    ShadowKind::BasicPacked
                }
            }
            ShadowConfig::Variance { .. } => ShadowKind::Variance,
        }
    }
}

impl LabelDecider for StandardLabels {
    fn depth(&self, material: &Material) -> DepthLabel {
        if !material.flags.contains(MaterialFlags::ALPHA_DEPTH) {
            DepthLabel::Constant
        } else if material.albedo_texture.is_some() {
            DepthLabel::Mapped
        } else {
            DepthLabel::Uniform
        }
    }

    fn surface(&self, material: &Material) -> SurfaceLabel {
        SurfaceLabel {
            kind: if material.flags.contains(MaterialFlags::ALPHA_DEPTH) {
                SurfaceKind::AlphaDepth
            } else {
                SurfaceKind::Regular
            },
            maps: material.maps(),
        }
    }

    fn light(&self, light: &Light, capabilities: &Capabilities) -> LightLabel {
        match light {
            Light::Directional(_) => LightLabel::Directional,
            Light::Spherical(_) => LightLabel::Spherical,
            Light::Projective(projective) => LightLabel::Projective {
                shadow: projective
                    .shadow
                    .as_ref()
                    .map(|config| Self::shadow_kind(config, capabilities)),
            },
        }
    }

    fn shadow(
        &self,
        material: &Material,
        config: &ShadowConfig,
        capabilities: &Capabilities,
    ) -> ShadowLabel {
        ShadowLabel {
            depth: self.depth(material),
            kind: Self::shadow_kind(config, capabilities),
        }
    }
}

impl fmt::Display for DepthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constant => "constant",
            Self::Uniform => "uniform",
            Self::Mapped => "mapped",
        })
    }
}

impl fmt::Display for ShadowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Basic => "basic",
            Self::BasicPacked => "basic_packed",
            Self::Variance => "variance",
        })
    }
}

impl fmt::Display for SurfaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.kind {
            SurfaceKind::Regular => "regular",
            SurfaceKind::AlphaDepth => "alpha_depth",
        })?;
        for (name, map) in [
            ("albedo", MaterialMaps::ALBEDO),
            ("normal", MaterialMaps::NORMAL),
            ("specular", MaterialMaps::SPECULAR),
            ("emission", MaterialMaps::EMISSION),
            ("environment", MaterialMaps::ENVIRONMENT),
        ] {
            if self.maps.contains(map) {
                write!(f, "+{name}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for LightLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directional => f.write_str("directional"),
            Self::Spherical => f.write_str("spherical"),
            Self::Projective { shadow: None } => f.write_str("projective"),
            Self::Projective {
                shadow: Some(kind),
            } => write!(f, "projective.{kind}"),
        }
    }
}

impl fmt::Display for ShadingLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depth(depth) => write!(f, "depth.{depth}"),
            Self::Shadow(shadow) => write!(f, "shadow.{}.{}", shadow.kind, shadow.depth),
            Self::Lit(lit) => write!(f, "lit.{}.{}", lit.surface, lit.light),
            Self::Unlit(surface) => write!(f, "unlit.{surface}"),
            Self::Geometry(surface) => write!(f, "geometry.{surface}"),
            Self::DeferredLight(light) => write!(f, "deferred_light.{light}"),
        }
    }
}
