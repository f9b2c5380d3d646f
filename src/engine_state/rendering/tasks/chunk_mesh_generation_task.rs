//! Task for building a chunk mesh on a worker thread.
//!
//! The task owns the voxel buffer it meshes. For a newly generated chunk that
//! buffer is the chunk itself and is handed back with the mesh to be
//! installed; for a re-mesh after an edit it is a copy and is dropped once
//! the mesh is built.

use crate::engine_state::{
    rendering::meshing::mesh::{greedy_mesh, MeshData},
    task_management::task::{Task, TaskResult},
    voxels::{chunk::Chunk, chunk_manager::ChunkStore},
};

/// What the main thread does with a finished mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshDelivery {
    /// First mesh of a generated chunk: install the returned buffer as loaded.
    Install {
        /// Generation ticket the chunk was requested under.
        ticket: u64,
    },
    /// Rebuild after an edit: replace the mesh if nothing newer is installed.
    Refresh {
        /// Chunk revision the buffer copy was taken at.
        revision: u64,
    },
}

/// A task that greedy-meshes one chunk.
pub struct ChunkMeshGenerationTask {
    chunk: Chunk,
    delivery: MeshDelivery,
}

impl ChunkMeshGenerationTask {
    /// Creates a new mesh task that takes ownership of `chunk`.
    pub fn new(chunk: Chunk, delivery: MeshDelivery) -> Self {
        ChunkMeshGenerationTask { chunk, delivery }
    }
}

impl Task for ChunkMeshGenerationTask {
    fn process(self: Box<Self>) -> Box<dyn TaskResult> {
        let ChunkMeshGenerationTask { chunk, delivery } = *self;
        let mesh = greedy_mesh(&chunk);
        Box::new(ChunkMeshGenerationTaskResult { chunk, mesh, delivery })
    }
}

/// A built mesh plus the buffer it was built from.
pub struct ChunkMeshGenerationTaskResult {
    chunk: Chunk,
    mesh: MeshData,
    delivery: MeshDelivery,
}

impl TaskResult for ChunkMeshGenerationTaskResult {
    fn handle_result(self: Box<Self>, store: &mut ChunkStore) -> Vec<Box<dyn Task>> {
        let result = *self;
        match result.delivery {
            MeshDelivery::Install { ticket } => {
                store.install_chunk(result.chunk, result.mesh, ticket);
            }
            MeshDelivery::Refresh { revision } => {
                store.swap_mesh(result.chunk.coord, result.mesh, revision);
            }
        }
        Vec::new()
    }
}
