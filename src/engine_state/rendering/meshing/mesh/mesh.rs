//! Mesh buffers produced by the greedy mesher.
//!
//! `MeshData` keeps positions, normals, UVs and indices in separate flat
//! arrays, which is what WebGL-style buffer attributes consume. `MeshVertex`
//! is the interleaved `Pod` layout for renderers that prefer one vertex
//! buffer.

use bytemuck::{Pod, Zeroable};

/// One interleaved vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Chunk-local position.
    pub position: [f32; 3],
    /// Face normal.
    pub normal: [f32; 3],
    /// Atlas texture coordinate.
    pub uv: [f32; 2],
}

/// Renderable geometry for one chunk.
///
/// An empty mesh means "nothing to display" and is not an error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// xyz triples, four per quad.
    pub vertices: Vec<f32>,
    /// xyz normal per vertex.
    pub normals: Vec<f32>,
    /// uv pair per vertex.
    pub uvs: Vec<f32>,
    /// Two triangles per quad.
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the mesh has no geometry.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Number of quads.
    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }

    /// Appends a quad. Corners are emitted in the given order and indexed as
    /// triangles `0 1 2` and `0 2 3`.
    pub fn push_quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3], uvs: [[f32; 2]; 4]) {
        let base = self.vertex_count() as u32;
        for corner in corners {
            self.vertices.extend_from_slice(&corner);
            self.normals.extend_from_slice(&normal);
        }
        for uv in uvs {
            self.uvs.extend_from_slice(&uv);
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Interleaved copy of the vertex attributes.
    pub fn interleaved(&self) -> Vec<MeshVertex> {
        (0..self.vertex_count())
            .map(|i| MeshVertex {
                position: [self.vertices[i * 3], self.vertices[i * 3 + 1], self.vertices[i * 3 + 2]],
                normal: [self.normals[i * 3], self.normals[i * 3 + 1], self.normals[i * 3 + 2]],
                uv: [self.uvs[i * 2], self.uvs[i * 2 + 1]],
            })
            .collect()
    }

    /// Raw bytes of the position attribute, ready for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw bytes of the index buffer, ready for upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}
