//! # Chunk Generation Task
//!
//! Generates a chunk's voxels on a worker thread. The generated buffer is
//! owned by the task until it comes back in the result, at which point the
//! main thread replays the chunk's edits and moves it into a mesh task.

use std::sync::Arc;

use crate::engine_state::{
    rendering::tasks::chunk_mesh_generation_task::{ChunkMeshGenerationTask, MeshDelivery},
    task_management::task::{Task, TaskResult},
    voxels::{
        chunk::{Chunk, ChunkCoord},
        chunk_manager::ChunkStore,
        generation::{generate_chunk, BiomeConfig, NoiseGenerator},
    },
};

/// A task that generates one chunk's voxel buffer.
pub struct ChunkGenerationTask {
    coord: ChunkCoord,
    /// Request ticket; results for superseded requests are dropped.
    ticket: u64,
    seed: String,
    noise: Arc<NoiseGenerator>,
    biome: BiomeConfig,
}

impl ChunkGenerationTask {
    /// Creates a new chunk generation task.
    ///
    /// # Arguments
    /// * `coord` - Chunk to generate
    /// * `ticket` - Ticket issued by the chunk store for this request
    /// * `seed` - Room seed
    /// * `noise` - Noise generator built from `seed`
    /// * `biome` - Theme parameters
    pub fn new(coord: ChunkCoord, ticket: u64, seed: String, noise: Arc<NoiseGenerator>, biome: BiomeConfig) -> Self {
        ChunkGenerationTask {
            coord,
            ticket,
            seed,
            noise,
            biome,
        }
    }
}

impl Task for ChunkGenerationTask {
    fn process(self: Box<Self>) -> Box<dyn TaskResult> {
        let chunk = generate_chunk(self.coord, &self.seed, &self.noise, &self.biome);
        Box::new(ChunkGenerationTaskResult {
            chunk,
            ticket: self.ticket,
        })
    }
}

/// A freshly generated chunk travelling back to the main thread.
pub struct ChunkGenerationTaskResult {
    chunk: Chunk,
    ticket: u64,
}

impl TaskResult for ChunkGenerationTaskResult {
    /// Replays recorded edits and schedules meshing, unless the chunk was
    /// evicted or re-requested while it was being generated.
    fn handle_result(self: Box<Self>, store: &mut ChunkStore) -> Vec<Box<dyn Task>> {
        let ChunkGenerationTaskResult { mut chunk, ticket } = *self;
        if !store.is_ticket_current(chunk.coord, ticket) {
            log::debug!("Dropping generated chunk {:?}: no longer requested", chunk.coord);
            return Vec::new();
        }

        store.replay_modifications(&mut chunk);

        let mesh_task: Box<dyn Task> = Box::new(ChunkMeshGenerationTask::new(
            chunk,
            MeshDelivery::Install { ticket },
        ));
        vec![mesh_task]
    }
}
