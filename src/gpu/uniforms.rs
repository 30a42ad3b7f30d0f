use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};

/// Per-draw uniform block shared by every program.
///
/// Layout matches a WGSL `struct` at group 0 binding 0; `mat3x3<f32>` columns
/// are padded to 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct DrawUniforms {
    pub model_view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_inverse: [[f32; 4]; 4],
    pub eye_to_light_clip: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
    pub uv: [[f32; 4]; 3],
    pub base_color: [f32; 4],
    /// alpha threshold, specular exponent, emission, specular intensity
    pub material: [f32; 4],
    /// rgb color, intensity
    pub light_color: [f32; 4],
    /// eye-space position, radius
    pub light_position: [f32; 4],
    /// eye-space direction, falloff exponent
    pub light_direction: [f32; 4],
    /// depth bias, minimum variance, light bleed reduction, shadow kind
    pub shadow: [f32; 4],
    /// width, height, 1/width, 1/height
    pub screen: [f32; 4],
    /// filter and pass specific parameters (blur step, fog range)
    pub params: [f32; 4],
    pub fog_color: [f32; 4],
}

impl DrawUniforms {
    pub fn new() -> Self {
        Self {
            model_view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
            view_inverse: Mat4::IDENTITY.to_cols_array_2d(),
            eye_to_light_clip: Mat4::IDENTITY.to_cols_array_2d(),
            normal: pad_mat3(Mat3::IDENTITY),
            uv: pad_mat3(Mat3::IDENTITY),
            base_color: [1.0; 4],
            ..<Self as Zeroable>::zeroed()
        }
    }

    pub fn set_model_view(&mut self, model_view: Mat4) {
        self.model_view = model_view.to_cols_array_2d();
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection.to_cols_array_2d();
    }

    pub fn set_view_inverse(&mut self, view_inverse: Mat4) {
        self.view_inverse = view_inverse.to_cols_array_2d();
    }

    pub fn set_eye_to_light_clip(&mut self, matrix: Mat4) {
        self.eye_to_light_clip = matrix.to_cols_array_2d();
    }

    pub fn set_normal(&mut self, normal: Mat3) {
        self.normal = pad_mat3(normal);
    }

    pub fn set_uv(&mut self, uv: Mat3) {
        self.uv = pad_mat3(uv);
    }

    pub fn set_screen(&mut self, width: u32, height: u32) {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        self.screen = [w, h, 1.0 / w, 1.0 / h];
    }

    pub fn set_light(&mut self, color: Vec3, intensity: f32, position: Vec4, direction: Vec4) {
        self.light_color = [color.x, color.y, color.z, intensity];
        self.light_position = position.to_array();
        self.light_direction = direction.to_array();
    }
}

impl Default for DrawUniforms {
    fn default() -> Self {
        Self::new()
    }
}

fn pad_mat3(m: Mat3) -> [[f32; 4]; 3] {
    [
        m.x_axis.extend(0.0).to_array(),
        m.y_axis.extend(0.0).to_array(),
        m.z_axis.extend(0.0).to_array(),
    ]
}
