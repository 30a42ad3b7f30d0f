// scene/mod.rs

pub mod camera;
pub mod instance;
pub mod light;
pub mod material;
pub mod transform;

pub use camera::Camera;
pub use instance::Instance;
pub use light::{
    DirectionalLight, Light, LightId, ProjectiveLight, ShadowConfig, SphericalLight,
};
pub use material::{Material, MaterialFlags, MaterialMaps};
pub use transform::Transform;

/// Everything the renderer needs for one frame. Built by the caller each
/// frame; the renderer keeps no reference to it after `render_frame`.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub camera: Camera,
    pub lights: Vec<Light>,
    pub instances: Vec<Instance>,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            lights: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn add_light(&mut self, light: impl Into<Light>) -> usize {
        self.lights.push(light.into());
        self.lights.len() - 1
    }

    pub fn add_instance(&mut self, instance: Instance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }

    pub fn with_light(mut self, light: impl Into<Light>) -> Self {
        self.add_light(light);
        self
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.add_instance(instance);
        self
    }
}
