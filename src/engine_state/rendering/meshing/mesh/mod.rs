//! Chunk mesh extraction.
//!
//! * `mesh` - CPU-side mesh buffers handed to the render collaborator
//! * `greedy` - greedy meshing of a chunk's voxel buffer

pub mod greedy;
pub mod mesh;

pub use greedy::{greedy_mesh, greedy_mesh_with_boundary};
pub use mesh::{MeshData, MeshVertex};
