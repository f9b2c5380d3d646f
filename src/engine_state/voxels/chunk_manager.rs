//! # Chunk Manager
//!
//! Keeps a square window of chunks loaded and meshed around the player and is
//! the single owner of every loaded voxel buffer.
//!
//! ## Architecture
//!
//! The manager is split in two so task results can be applied while the task
//! manager itself is borrowed:
//!
//! * `ChunkStore` - loaded chunks, their meshes, the per-chunk modification
//!   log and the bookkeeping for work in flight
//! * `ChunkManager` - the store plus the worker pool and the per-seed noise
//!   cache, exposing the public block and diff operations
//!
//! ## Lifecycle
//!
//! 1. `update_chunks_around_player` requests every missing chunk in the
//!    `(2 * view_distance + 1)^2` square and evicts everything outside it
//! 2. A generation task builds the voxels on a worker
//! 3. On the main thread the chunk's modification log is replayed onto the
//!    fresh buffer, which then moves into a mesh task
//! 4. The mesh task hands the buffer back with its mesh, and the chunk is
//!    installed as loaded
//!
//! Edits re-mesh only the edited chunk. Neighbours are never rebuilt, so a
//! stale face can remain visible on a chunk seam.
//!
//! The modification log outlives eviction: a chunk that re-enters the view
//! window comes back with every edit it had. It is only dropped by
//! `clear_modifications` or `dispose`.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info, warn};

use crate::engine_state::{
    rendering::{
        meshing::mesh::MeshData,
        tasks::chunk_mesh_generation_task::{ChunkMeshGenerationTask, MeshDelivery},
    },
    task_management::TaskManager,
};

use super::{
    block::{BlockType, BlockTypeSize},
    chunk::{split_world_position, Chunk, ChunkCoord, ChunkDiff, DiffEntry},
    generation::{NoiseCache, Theme},
    tasks::chunk_generation_task::ChunkGenerationTask,
};

/// A change to the set of chunk meshes the renderer should display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshUpdate {
    /// A new or rebuilt mesh is available for this chunk.
    Ready(ChunkCoord),
    /// The chunk was evicted; drop its mesh.
    Removed(ChunkCoord),
}

/// Result of partitioning diffs by chunk readiness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffPartition {
    /// Diffs whose chunk is loaded and can be applied now.
    pub applied: Vec<ChunkDiff>,
    /// Diffs whose chunk is not loaded yet; retry once it is.
    pub pending: Vec<ChunkDiff>,
}

struct LoadedChunk {
    chunk: Chunk,
    revision: u64,
}

struct ChunkMesh {
    mesh: MeshData,
    revision: u64,
}

/// Chunk data and bookkeeping, mutated by the manager and by task results.
#[derive(Default)]
pub struct ChunkStore {
    loaded: HashMap<ChunkCoord, LoadedChunk>,
    meshes: HashMap<ChunkCoord, ChunkMesh>,
    /// Generation tickets of chunks requested but not yet installed.
    in_flight: HashMap<ChunkCoord, u64>,
    modifications: BTreeMap<ChunkCoord, BTreeMap<u16, BlockTypeSize>>,
    mesh_updates: Vec<MeshUpdate>,
    next_ticket: u64,
    /// Store-wide so revisions keep increasing across evict and reinstall.
    next_revision: u64,
}

impl ChunkStore {
    fn issue_ticket(&mut self, coord: ChunkCoord) -> u64 {
        self.next_ticket += 1;
        self.in_flight.insert(coord, self.next_ticket);
        self.next_ticket
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Whether a generation ticket still matches the latest request for its chunk.
    pub fn is_ticket_current(&self, coord: ChunkCoord, ticket: u64) -> bool {
        self.in_flight.get(&coord) == Some(&ticket)
    }

    /// Writes the chunk's logged modifications onto a freshly generated buffer.
    pub fn replay_modifications(&self, chunk: &mut Chunk) {
        if let Some(log) = self.modifications.get(&chunk.coord) {
            for (&index, &block) in log {
                chunk.set_index(index as usize, block);
            }
        }
    }

    /// Installs a generated and meshed chunk if its request is still current.
    ///
    /// # Returns
    /// `false` when the chunk was evicted or re-requested while in flight,
    /// in which case the buffer is dropped.
    pub fn install_chunk(&mut self, chunk: Chunk, mesh: MeshData, ticket: u64) -> bool {
        let coord = chunk.coord;
        if !self.is_ticket_current(coord, ticket) {
            debug!("Discarding stale chunk {:?}", coord);
            return false;
        }
        self.in_flight.remove(&coord);
        let revision = self.bump_revision();
        self.loaded.insert(coord, LoadedChunk { chunk, revision });
        self.meshes.insert(coord, ChunkMesh { mesh, revision });
        self.mesh_updates.push(MeshUpdate::Ready(coord));
        true
    }

    /// Swaps in a rebuilt mesh unless a newer one is already installed.
    pub fn swap_mesh(&mut self, coord: ChunkCoord, mesh: MeshData, revision: u64) -> bool {
        if !self.loaded.contains_key(&coord) {
            return false;
        }
        if let Some(existing) = self.meshes.get(&coord) {
            if existing.revision > revision {
                return false;
            }
        }
        self.meshes.insert(coord, ChunkMesh { mesh, revision });
        self.mesh_updates.push(MeshUpdate::Ready(coord));
        true
    }

    fn evict(&mut self, coord: ChunkCoord) {
        self.loaded.remove(&coord);
        if self.meshes.remove(&coord).is_some() {
            self.mesh_updates.push(MeshUpdate::Removed(coord));
        }
    }

    fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.loaded.contains_key(&coord)
    }

    /// Records an edit in the modification log and applies it to the loaded buffer.
    fn write_voxel(&mut self, coord: ChunkCoord, index: usize, block: BlockTypeSize) -> Option<&Chunk> {
        if !self.loaded.contains_key(&coord) {
            return None;
        }
        let revision = self.bump_revision();
        let loaded = self.loaded.get_mut(&coord)?;
        loaded.chunk.set_index(index, block);
        loaded.revision = revision;
        self.modifications
            .entry(coord)
            .or_default()
            .insert(index as u16, block);
        Some(&loaded.chunk)
    }

    fn revision(&self, coord: ChunkCoord) -> u64 {
        self.loaded.get(&coord).map_or(0, |loaded| loaded.revision)
    }
}

/// Streams, edits and persists the voxel world around the player.
pub struct ChunkManager {
    store: ChunkStore,
    task_manager: TaskManager,
    noise_cache: NoiseCache,
    world: Option<(String, Theme)>,
}

impl ChunkManager {
    /// Creates a manager with its own worker pool.
    ///
    /// # Arguments
    /// * `worker_threads` - Worker threads for generation and meshing; zero
    ///   runs tasks inline during `process_tasks`
    pub fn new(worker_threads: usize) -> Self {
        ChunkManager {
            store: ChunkStore::default(),
            task_manager: TaskManager::new(worker_threads),
            noise_cache: NoiseCache::default(),
            world: None,
        }
    }

    /// Loads the view window around a player position and evicts the rest.
    ///
    /// Chunks that are already loaded or in flight are not requested again.
    /// Results arrive asynchronously through `process_tasks`.
    ///
    /// # Arguments
    /// * `px`, `pz` - Player world position
    /// * `view_distance` - Window radius in chunks
    /// * `seed`, `theme` - World parameters; changing either drops every
    ///   loaded chunk and recorded edit so the new world starts clean
    pub fn update_chunks_around_player(&mut self, px: f64, pz: f64, view_distance: i32, seed: &str, theme: Theme) {
        self.switch_world(seed, theme);

        let center = ChunkCoord::from_world_position(px, pz);
        let view_distance = view_distance.max(0);

        let outside: Vec<ChunkCoord> = self
            .store
            .loaded
            .keys()
            .chain(self.store.in_flight.keys())
            .filter(|coord| coord.chebyshev_distance(&center) > view_distance)
            .copied()
            .collect();
        for coord in &outside {
            self.store.in_flight.remove(coord);
            self.store.evict(*coord);
        }
        if !outside.is_empty() {
            debug!("Evicted {} chunks around {:?}", outside.len(), center);
        }

        let noise = self.noise_cache.get_or_create(seed);
        let biome = theme.config();
        let mut requested = 0;
        for dx in -view_distance..=view_distance {
            for dz in -view_distance..=view_distance {
                let coord = ChunkCoord::new(center.cx + dx, center.cz + dz);
                if self.store.is_loaded(coord) || self.store.in_flight.contains_key(&coord) {
                    continue;
                }
                let ticket = self.store.issue_ticket(coord);
                self.task_manager.publish_task(Box::new(ChunkGenerationTask::new(
                    coord,
                    ticket,
                    seed.to_owned(),
                    noise.clone(),
                    biome.clone(),
                )));
                requested += 1;
            }
        }
        if requested > 0 {
            debug!("Requested {} chunks around {:?}", requested, center);
        }
    }

    fn switch_world(&mut self, seed: &str, theme: Theme) {
        let unchanged = matches!(&self.world, Some((s, t)) if s == seed && *t == theme);
        if unchanged {
            return;
        }
        if self.world.is_some() {
            info!("World parameters changed, dropping {} loaded chunks", self.store.loaded.len());
            let coords: Vec<ChunkCoord> = self.store.loaded.keys().copied().collect();
            for coord in coords {
                self.store.evict(coord);
            }
            self.store.in_flight.clear();
            self.store.modifications.clear();
            self.task_manager.clear_queue();
        }
        self.world = Some((seed.to_owned(), theme));
    }

    /// Applies finished work and dispatches queued tasks. Call once per frame.
    pub fn process_tasks(&mut self) {
        self.task_manager.process_completed_tasks(&mut self.store);
        self.task_manager.process_queued_tasks();
    }

    /// Blocks until all outstanding generation and meshing has been applied.
    pub fn flush(&mut self) {
        self.task_manager.flush(&mut self.store);
    }

    /// Block at a world voxel. Air for anything outside the vertical range or
    /// in a chunk that is not loaded.
    pub fn get_block(&self, world_x: i32, world_y: i32, world_z: i32) -> BlockType {
        let Some((coord, index)) = split_world_position(world_x, world_y, world_z) else {
            return BlockType::Air;
        };
        self.store
            .loaded
            .get(&coord)
            .and_then(|loaded| BlockType::from_id(loaded.chunk.get_index(index)))
            .unwrap_or(BlockType::Air)
    }

    /// Writes a block at a world voxel and re-meshes that chunk only.
    ///
    /// # Returns
    /// `false` (and no effect) if the position is outside the vertical range
    /// or its chunk is not loaded.
    pub fn set_block(&mut self, world_x: i32, world_y: i32, world_z: i32, block: BlockType) -> bool {
        let Some((coord, index)) = split_world_position(world_x, world_y, world_z) else {
            return false;
        };
        if self.store.write_voxel(coord, index, block.id()).is_none() {
            return false;
        }
        self.schedule_remesh(coord);
        true
    }

    fn schedule_remesh(&mut self, coord: ChunkCoord) {
        let revision = self.store.revision(coord);
        if let Some(loaded) = self.store.loaded.get(&coord) {
            self.task_manager.publish_task(Box::new(ChunkMeshGenerationTask::new(
                loaded.chunk.clone(),
                MeshDelivery::Refresh { revision },
            )));
        }
    }

    /// Snapshot of every non-empty modification log in wire form.
    ///
    /// Chunks are ordered by coordinate and entries by local index. The log
    /// is not cleared.
    pub fn get_modified_chunk_diffs(&self) -> Vec<ChunkDiff> {
        self.store
            .modifications
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(coord, log)| ChunkDiff {
                cx: coord.cx,
                cz: coord.cz,
                entries: log
                    .iter()
                    .map(|(&local_index, &block_type)| DiffEntry { local_index, block_type })
                    .collect(),
            })
            .collect()
    }

    /// Applies diffs to loaded chunks and hands back the rest.
    ///
    /// Each applied diff overwrites its voxels, is recorded in the
    /// modification log and triggers one re-mesh of its chunk. Malformed
    /// diffs are rejected whole.
    ///
    /// # Returns
    /// Diffs whose chunk is not loaded yet, in their original order.
    pub fn apply_chunk_diffs(&mut self, diffs: Vec<ChunkDiff>) -> Vec<ChunkDiff> {
        let DiffPartition { applied, pending } = self.filter_pending_diffs(diffs);
        for diff in applied {
            if !diff.is_well_formed() {
                warn!("Rejecting malformed diff for chunk ({}, {})", diff.cx, diff.cz);
                continue;
            }
            let coord = diff.coord();
            for entry in &diff.entries {
                self.store
                    .write_voxel(coord, entry.local_index as usize, entry.block_type);
            }
            self.schedule_remesh(coord);
        }
        pending
    }

    /// Splits diffs into those whose chunk is loaded and those still pending.
    pub fn filter_pending_diffs(&self, diffs: Vec<ChunkDiff>) -> DiffPartition {
        let (applied, pending): (Vec<ChunkDiff>, Vec<ChunkDiff>) = diffs
            .into_iter()
            .partition(|diff| self.store.is_loaded(diff.coord()));
        DiffPartition { applied, pending }
    }

    /// Whether a chunk is loaded.
    pub fn is_chunk_loaded(&self, coord: ChunkCoord) -> bool {
        self.store.is_loaded(coord)
    }

    /// Coordinates of every loaded chunk.
    pub fn loaded_chunks(&self) -> HashSet<ChunkCoord> {
        self.store.loaded.keys().copied().collect()
    }

    /// Number of chunks requested but not yet installed.
    pub fn pending_chunk_count(&self) -> usize {
        self.store.in_flight.len()
    }

    /// The current mesh of a chunk, if loaded.
    pub fn mesh(&self, coord: ChunkCoord) -> Option<&MeshData> {
        self.store.meshes.get(&coord).map(|m| &m.mesh)
    }

    /// Takes the mesh changes accumulated since the last call.
    pub fn drain_mesh_updates(&mut self) -> Vec<MeshUpdate> {
        std::mem::take(&mut self.store.mesh_updates)
    }

    /// Forgets every recorded edit. Loaded voxels are left as they are.
    pub fn clear_modifications(&mut self) {
        self.store.modifications.clear();
    }

    /// Drops all chunks, meshes, edits, queued work and cached noise.
    pub fn dispose(&mut self) {
        self.task_manager.clear_queue();
        let coords: Vec<ChunkCoord> = self.store.loaded.keys().copied().collect();
        for coord in coords {
            self.store.evict(coord);
        }
        self.store.in_flight.clear();
        self.store.modifications.clear();
        self.noise_cache.clear();
        self.world = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::chunk::voxel_index;

    fn loaded_manager(view_distance: i32) -> ChunkManager {
        let mut manager = ChunkManager::new(0);
        manager.update_chunks_around_player(8.0, 8.0, view_distance, "abc", Theme::Forest);
        manager.flush();
        manager
    }

    #[test]
    fn loads_the_full_view_square() {
        let manager = loaded_manager(1);
        assert_eq!(manager.loaded_chunks().len(), 9);
        assert_eq!(manager.pending_chunk_count(), 0);
        assert!(manager.mesh(ChunkCoord::new(0, 0)).is_some());
    }

    #[test]
    fn moving_evicts_chunks_outside_the_window() {
        let mut manager = loaded_manager(1);
        manager.drain_mesh_updates();
        manager.update_chunks_around_player(40.0, 8.0, 1, "abc", Theme::Forest);
        manager.flush();
        let loaded = manager.loaded_chunks();
        assert_eq!(loaded.len(), 9);
        assert!(!loaded.contains(&ChunkCoord::new(-1, 0)));
        assert!(loaded.contains(&ChunkCoord::new(3, 0)));
        let removed = manager
            .drain_mesh_updates()
            .into_iter()
            .filter(|u| matches!(u, MeshUpdate::Removed(_)))
            .count();
        assert_eq!(removed, 6);
    }

    #[test]
    fn unloaded_reads_are_air_and_writes_are_ignored() {
        let mut manager = ChunkManager::new(0);
        assert_eq!(manager.get_block(0, 10, 0), BlockType::Air);
        assert!(!manager.set_block(0, 10, 0, BlockType::Stone));
        assert!(manager.get_modified_chunk_diffs().is_empty());

        let mut manager = loaded_manager(0);
        assert!(!manager.set_block(0, 64, 0, BlockType::Stone));
        assert!(!manager.set_block(0, -1, 0, BlockType::Stone));
        assert_eq!(manager.get_block(0, -1, 0), BlockType::Air);
    }

    #[test]
    fn set_block_records_a_diff_and_remeshes() {
        let mut manager = loaded_manager(0);
        manager.drain_mesh_updates();
        assert!(manager.set_block(3, 20, 3, BlockType::Stone));
        assert_eq!(manager.get_block(3, 20, 3), BlockType::Stone);
        manager.flush();
        assert_eq!(manager.drain_mesh_updates(), vec![MeshUpdate::Ready(ChunkCoord::new(0, 0))]);

        let diffs = manager.get_modified_chunk_diffs();
        assert_eq!(
            diffs,
            vec![ChunkDiff {
                cx: 0,
                cz: 0,
                entries: vec![DiffEntry {
                    local_index: voxel_index(3, 20, 3) as u16,
                    block_type: BlockType::Stone.id(),
                }],
            }]
        );
        // Reading does not clear the log.
        assert_eq!(manager.get_modified_chunk_diffs().len(), 1);
    }

    #[test]
    fn diffs_for_unloaded_chunks_are_returned_pending() {
        let mut manager = loaded_manager(0);
        let here = ChunkDiff {
            cx: 0,
            cz: 0,
            entries: vec![DiffEntry { local_index: voxel_index(1, 40, 1) as u16, block_type: 7 }],
        };
        let far = ChunkDiff { cx: 5, cz: 5, entries: vec![DiffEntry { local_index: 0, block_type: 7 }] };

        let partition = manager.filter_pending_diffs(vec![here.clone(), far.clone()]);
        assert_eq!(partition.applied, vec![here.clone()]);
        assert_eq!(partition.pending, vec![far.clone()]);

        let pending = manager.apply_chunk_diffs(vec![here, far.clone()]);
        assert_eq!(pending, vec![far]);
        assert_eq!(manager.get_block(1, 40, 1), BlockType::Planks);
    }

    #[test]
    fn malformed_diffs_are_not_applied() {
        let mut manager = loaded_manager(0);
        let bad = ChunkDiff {
            cx: 0,
            cz: 0,
            entries: vec![
                DiffEntry { local_index: voxel_index(2, 50, 2) as u16, block_type: 3 },
                DiffEntry { local_index: 1, block_type: 99 },
            ],
        };
        assert!(manager.apply_chunk_diffs(vec![bad]).is_empty());
        assert_eq!(manager.get_block(2, 50, 2), BlockType::Air);
        assert!(manager.get_modified_chunk_diffs().is_empty());
    }

    #[test]
    fn edits_survive_eviction_and_reload() {
        let mut manager = loaded_manager(0);
        manager.set_block(5, 45, 5, BlockType::Cobblestone);
        manager.update_chunks_around_player(200.0, 200.0, 0, "abc", Theme::Forest);
        manager.flush();
        assert!(!manager.is_chunk_loaded(ChunkCoord::new(0, 0)));
        assert_eq!(manager.get_block(5, 45, 5), BlockType::Air);

        manager.update_chunks_around_player(8.0, 8.0, 0, "abc", Theme::Forest);
        manager.flush();
        assert_eq!(manager.get_block(5, 45, 5), BlockType::Cobblestone);
    }

    #[test]
    fn chunks_evicted_in_flight_are_discarded() {
        let mut manager = ChunkManager::new(0);
        manager.update_chunks_around_player(8.0, 8.0, 0, "abc", Theme::Forest);
        manager.update_chunks_around_player(400.0, 8.0, 0, "abc", Theme::Forest);
        manager.flush();
        let loaded = manager.loaded_chunks();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains(&ChunkCoord::new(25, 0)));
    }

    #[test]
    fn worker_threads_produce_the_same_terrain_as_inline_execution() {
        let inline = loaded_manager(1);
        let mut threaded = ChunkManager::new(2);
        threaded.update_chunks_around_player(8.0, 8.0, 1, "abc", Theme::Forest);
        threaded.flush();
        assert_eq!(threaded.loaded_chunks(), inline.loaded_chunks());
        for y in 0..64 {
            assert_eq!(threaded.get_block(-7, y, 20), inline.get_block(-7, y, 20));
        }
        assert_eq!(threaded.mesh(ChunkCoord::new(1, 1)), inline.mesh(ChunkCoord::new(1, 1)));
    }

    #[test]
    fn changing_the_seed_regenerates_the_window() {
        let mut manager = loaded_manager(0);
        manager.set_block(1, 50, 1, BlockType::Stone);
        manager.update_chunks_around_player(8.0, 8.0, 0, "other", Theme::Snow);
        assert!(!manager.is_chunk_loaded(ChunkCoord::new(0, 0)));
        manager.flush();
        assert!(manager.is_chunk_loaded(ChunkCoord::new(0, 0)));
        assert_eq!(manager.get_block(1, 50, 1), BlockType::Air);
        assert!(manager.get_modified_chunk_diffs().is_empty());
    }

    #[test]
    fn refresh_from_before_eviction_is_not_swapped_into_a_reinstalled_chunk() {
        let coord = ChunkCoord::new(2, -1);
        let mut store = ChunkStore::default();
        let ticket = store.issue_ticket(coord);
        assert!(store.install_chunk(Chunk::empty(coord), MeshData::new(), ticket));

        store.write_voxel(coord, 0, BlockType::Stone.id());
        let stale_revision = store.revision(coord);
        store.evict(coord);

        let ticket = store.issue_ticket(coord);
        assert!(store.install_chunk(Chunk::empty(coord), MeshData::new(), ticket));
        assert!(store.revision(coord) > stale_revision);

        let mut stale_mesh = MeshData::new();
        stale_mesh.push_quad([[0.0; 3]; 4], [0.0, 1.0, 0.0], [[0.0; 2]; 4]);
        assert!(!store.swap_mesh(coord, stale_mesh, stale_revision));
        assert!(store.meshes[&coord].mesh.is_empty());

        store.write_voxel(coord, 1, BlockType::Dirt.id());
        assert!(store.swap_mesh(coord, MeshData::new(), store.revision(coord)));
    }
}
