//! Rendering-facing side of the engine.
//!
//! The engine does not draw anything itself. It produces chunk meshes on the
//! worker pool and reports which ones changed; the render collaborator pulls
//! them through `ChunkManager::mesh` and `ChunkManager::drain_mesh_updates`.

pub mod meshing;
pub mod tasks;
