use std::mem;

use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, RenderResult};

/// Interleaved mesh vertex. Locations 0..=2 match the `VertexInput` struct
/// shared by the mesh programs.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2
    ];

    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// CPU-side indexed triangle list handed to the backend for upload.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Rejects meshes a backend could not draw: no triangles, a partial
    /// triangle, or an index past the vertex list.
    pub fn validate(&self) -> RenderResult<()> {
        let reason = if self.indices.is_empty() {
            Some("mesh has no indices".to_string())
        } else if self.indices.len() % 3 != 0 {
            Some(format!(
                "{} indices do not form whole triangles",
                self.indices.len()
            ))
        } else {
            self.indices
                .iter()
                .find(|&&index| index as usize >= self.vertices.len())
                .map(|index| {
                    format!(
                        "index {} out of range for {} vertices",
                        index,
                        self.vertices.len()
                    )
                })
        };
        match reason {
            Some(reason) => Err(RenderError::load("mesh", reason)),
            None => Ok(()),
        }
    }

    /// Unit quad in the XY plane facing +Z.
    pub fn quad() -> Self {
        let n = [0.0, 0.0, 1.0];
        Self::new(
            vec![
                Vertex::new([-0.5, -0.5, 0.0], n, [0.0, 1.0]),
                Vertex::new([0.5, -0.5, 0.0], n, [1.0, 1.0]),
                Vertex::new([0.5, 0.5, 0.0], n, [1.0, 0.0]),
                Vertex::new([-0.5, 0.5, 0.0], n, [0.0, 0.0]),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }
}
