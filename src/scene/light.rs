use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::renderer::postprocess::BlurParameters;

/// Caller-chosen identity of a light, stable across frames. Shadow maps are
/// cached per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShadowConfig {
    /// Single depth comparison per fragment.
    Basic { size_exponent: u8, depth_bias: f32 },
    /// Depth and depth squared, blurred, sampled with Chebyshev's inequality.
    Variance {
        size_exponent: u8,
        minimum_variance: f32,
        light_bleed_reduction: f32,
        blur: BlurParameters,
    },
}

impl ShadowConfig {
    pub fn size_exponent(&self) -> u8 {
        match self {
            Self::Basic { size_exponent, .. } | Self::Variance { size_exponent, .. } => {
                *size_exponent
            }
        }
    }

    /// Edge length in pixels of the square shadow map.
    pub fn size(&self) -> u32 {
        1 << u32::from(self.size_exponent()).min(15)
    }

    /// depth bias, minimum variance, light bleed reduction
    pub fn parameters(&self) -> [f32; 3] {
        match *self {
            Self::Basic { depth_bias, .. } => [depth_bias, 0.0, 0.0],
            Self::Variance {
                minimum_variance,
                light_bleed_reduction,
                ..
            } => [0.0, minimum_variance, light_bleed_reduction],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }
}

/// Point light with a finite radius of influence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub falloff: f32,
}

impl SphericalLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
            falloff: 1.0,
        }
    }
}

/// Light projected through a frustum, like a spot light or projector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectiveLight {
    pub id: LightId,
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub falloff: f32,
    pub shadow: Option<ShadowConfig>,
}

impl ProjectiveLight {
    pub fn new(id: LightId, position: Vec3, target: Vec3) -> Self {
        Self {
            id,
            position,
            target,
            up: Vec3::Y,
            fov_y_radians: 45f32.to_radians(),
            near: 0.1,
            radius: 50.0,
            color: Vec3::ONE,
            intensity: 1.0,
            falloff: 1.0,
            shadow: None,
        }
    }

    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Square frustum; shadow maps are square.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, 1.0, self.near, self.radius)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional(DirectionalLight),
    Spherical(SphericalLight),
    Projective(ProjectiveLight),
}

impl Light {
    pub fn color(&self) -> Vec3 {
        match self {
            Self::Directional(l) => l.color,
            Self::Spherical(l) => l.color,
            Self::Projective(l) => l.color,
        }
    }

    pub fn intensity(&self) -> f32 {
        match self {
            Self::Directional(l) => l.intensity,
            Self::Spherical(l) => l.intensity,
            Self::Projective(l) => l.intensity,
        }
    }

    /// The light's shadow settings; only projective lights cast shadow maps.
    pub fn shadow(&self) -> Option<&ShadowConfig> {
        match self {
            Self::Projective(l) => l.shadow.as_ref(),
            Self::Directional(_) | Self::Spherical(_) => None,
        }
    }

    pub fn as_projective(&self) -> Option<&ProjectiveLight> {
        match self {
            Self::Projective(l) => Some(l),
            _ => None,
        }
    }

    /// Position (w = 1) or direction (w = 0) in eye space, and the direction
    /// the light faces with its falloff in w.
    pub fn eye_space(&self, view: Mat4) -> (Vec4, Vec4) {
        match self {
            Self::Directional(l) => {
                let d = view.transform_vector3(l.direction);
                (d.extend(0.0), d.extend(0.0))
            }
            Self::Spherical(l) => {
                let p = view.transform_point3(l.position);
                (p.extend(l.radius), Vec4::new(0.0, 0.0, 0.0, l.falloff))
            }
            Self::Projective(l) => {
                let p = view.transform_point3(l.position);
                let d = view.transform_vector3(l.direction());
                (p.extend(l.radius), d.extend(l.falloff))
            }
        }
    }
}

impl From<DirectionalLight> for Light {
    fn from(light: DirectionalLight) -> Self {
        Self::Directional(light)
    }
}

impl From<SphericalLight> for Light {
    fn from(light: SphericalLight) -> Self {
        Self::Spherical(light)
    }
}

impl From<ProjectiveLight> for Light {
    fn from(light: ProjectiveLight) -> Self {
        Self::Projective(light)
    }
}
