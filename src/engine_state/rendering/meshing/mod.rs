//! Mesh generation for voxel rendering.
//!
//! Chunks are turned into CPU-side mesh buffers with greedy meshing. Uploading
//! and drawing them is left to the render collaborator, which only needs the
//! buffers and the block-type integers baked into their UVs.

pub mod mesh;
