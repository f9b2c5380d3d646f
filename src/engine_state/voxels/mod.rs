//! # Voxel Engine Core
//!
//! Representation, generation and streaming of the voxel world.
//!
//! ## Architecture
//!
//! * **Block**: the block catalogue and the hotbar
//! * **Chunk**: 16x16x64 voxel buffers, coordinates and sparse diffs
//! * **Generation**: seeded noise, biome themes and the terrain generator
//! * **Chunk Manager**: the loaded window around the player, edits and the
//!   modification log
//! * **Tasks**: off-thread chunk generation
//!
//! ## Data Flow
//!
//! 1. The chunk manager requests chunks missing from the view window
//! 2. Generation tasks build voxels on a worker
//! 3. Logged edits are replayed and the chunk is meshed
//! 4. Edits write through the manager, which re-meshes the edited chunk

pub mod block;
pub mod chunk;
pub mod chunk_manager;
pub mod generation;
pub mod tasks;
