//! # Voxel Task System
//!
//! Tasks related to voxel world generation. They run on the chunk manager's
//! worker pool so terrain work never stalls the simulation loop.

pub mod chunk_generation_task;
