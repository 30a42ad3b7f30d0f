use glam::Mat3;

use crate::gpu::{FaceCulling, MeshId};
use crate::scene::{Material, Transform};

/// One drawable occurrence of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub mesh: MeshId,
    pub transform: Transform,
    /// Texture-coordinate transform applied before sampling material maps.
    pub uv: Mat3,
    pub material: Material,
    pub culling: FaceCulling,
    pub casts_shadows: bool,
}

impl Instance {
    pub fn new(mesh: MeshId, material: Material) -> Self {
        Self {
            mesh,
            transform: Transform::default(),
            uv: Mat3::IDENTITY,
            material,
            culling: FaceCulling::Back,
            casts_shadows: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_uv(mut self, uv: Mat3) -> Self {
        self.uv = uv;
        self
    }

    pub fn with_culling(mut self, culling: FaceCulling) -> Self {
        self.culling = culling;
        self
    }

    pub fn without_shadows(mut self) -> Self {
        self.casts_shadows = false;
        self
    }

    /// Culling mode to draw with; mirrored transforms swap front and back.
    pub fn effective_culling(&self) -> FaceCulling {
        match (self.culling, self.transform.is_mirrored()) {
            (FaceCulling::Back, true) => FaceCulling::Front,
            (FaceCulling::Front, true) => FaceCulling::Back,
            (culling, _) => culling,
        }
    }
}
