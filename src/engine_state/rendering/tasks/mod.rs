//! Background tasks for the rendering side of the engine.
//!
//! # Available Tasks
//! - `ChunkMeshGenerationTask`: builds a chunk mesh off the main thread

pub mod chunk_mesh_generation_task;
