//! # Engine State Module
//!
//! The simulation side of the sandbox: everything that runs once per frame on
//! the local client.
//!
//! ## Key Components
//!
//! * `EngineState` - The per-client world, player and targeting state
//! * `interaction` - Raycast targeting and break/place rules
//! * `physics` - Input snapshot and player controller
//! * `rendering` - Greedy meshing and mesh tasks
//! * `snapshot` - Binary save format for player edits
//! * `task_management` - Worker threads for generation and meshing
//! * `voxels` - Blocks, chunks, terrain generation and the chunk manager
//!
//! ## Frame Order
//!
//! `update` steps the player, streams chunks around the new position, applies
//! finished worker results, retries pending diffs and finally refreshes the
//! block under the crosshair, in that order.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use web_time::{Duration, SystemTime, UNIX_EPOCH};

use interaction::{BlockInteraction, VoxelCoord, VoxelEdit};
use physics::{update_player, InputState, PlayerState};
use snapshot::WorldSnapshot;
use voxels::{
    block::{hotbar_block, BlockType, BlockTypeSize},
    chunk::{split_world_position, ChunkCoord, ChunkDiff, DiffEntry},
    chunk_manager::ChunkManager,
    generation::Theme,
};

use crate::config::EngineConfig;

pub mod interaction;
pub mod physics;
pub mod rendering;
pub mod snapshot;
pub mod task_management;
pub mod voxels;

/// Longest step the simulation accepts; longer frames are clamped.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Per-client simulation state.
///
/// Owns the chunk manager (and through it every voxel), the local player and
/// the diffs still waiting for their chunk to load.
pub struct EngineState {
    /// World and quality settings
    config: EngineConfig,
    /// The voxel world
    chunk_manager: ChunkManager,
    /// Local player physics state
    player: PlayerState,
    /// Crosshair target
    interaction: BlockInteraction,
    /// Snapshot and remote edits whose chunk is not loaded yet, merged per
    /// chunk with the latest write per voxel
    pending_diffs: BTreeMap<ChunkCoord, BTreeMap<u16, BlockTypeSize>>,
    /// Chunk the player stood in last frame
    current_player_chunk_position: ChunkCoord,
}

impl EngineState {
    /// Creates an engine for a world. Nothing is generated until the first
    /// `update`.
    pub fn new(config: EngineConfig) -> Self {
        info!(
            "Creating engine for seed {:?}, theme {}, quality {:?}",
            config.seed, config.theme, config.quality
        );
        let player = PlayerState::spawn();
        Self {
            chunk_manager: ChunkManager::new(config.worker_threads),
            current_player_chunk_position: ChunkCoord::from_world_position(player.position.x, player.position.z),
            config,
            player,
            interaction: BlockInteraction::new(),
            pending_diffs: BTreeMap::new(),
        }
    }

    /// Advances the simulation by one frame.
    ///
    /// # Arguments
    ///
    /// * `wait_duration` - Time since the previous frame, capped at
    ///   [`MAX_FRAME_DELTA`]
    /// * `input` - This frame's input snapshot
    pub fn update(&mut self, wait_duration: Duration, input: &InputState) {
        let dt = wait_duration.min(MAX_FRAME_DELTA).as_secs_f64();

        // Hold the player in place until the ground under them exists.
        let player_chunk = ChunkCoord::from_world_position(self.player.position.x, self.player.position.z);
        if self.chunk_manager.is_chunk_loaded(player_chunk) {
            let chunks = &self.chunk_manager;
            self.player = update_player(&self.player, input, dt, |x, y, z| chunks.get_block(x, y, z));
        }

        let new_chunk_position = ChunkCoord::from_world_position(self.player.position.x, self.player.position.z);
        if new_chunk_position != self.current_player_chunk_position {
            debug!("Player moved into chunk {:?}", new_chunk_position);
            self.current_player_chunk_position = new_chunk_position;
        }

        self.chunk_manager.update_chunks_around_player(
            self.player.position.x,
            self.player.position.z,
            self.config.view_distance(),
            &self.config.seed,
            self.config.theme,
        );
        self.process_tasks();
        self.retry_pending_diffs();
        self.refresh_target();
    }

    /// Applies finished generation and meshing work.
    pub fn process_tasks(&mut self) {
        self.chunk_manager.process_tasks();
    }

    /// Blocks until every requested chunk is generated and meshed, then
    /// retries pending diffs.
    pub fn flush(&mut self) {
        self.chunk_manager.flush();
        self.retry_pending_diffs();
        self.refresh_target();
    }

    fn retry_pending_diffs(&mut self) {
        let ready: Vec<ChunkCoord> = self
            .pending_diffs
            .keys()
            .copied()
            .filter(|coord| self.chunk_manager.is_chunk_loaded(*coord))
            .collect();
        if ready.is_empty() {
            return;
        }
        debug!("Applying pending diffs for {} chunks", ready.len());
        let diffs: Vec<ChunkDiff> = ready
            .into_iter()
            .filter_map(|coord| {
                let entries = self.pending_diffs.remove(&coord)?;
                Some(to_chunk_diff(coord, &entries))
            })
            .collect();
        let still_pending = self.chunk_manager.apply_chunk_diffs(diffs);
        self.queue_pending(still_pending);
    }

    /// Merges diffs into the pending set. Later writes to a voxel win.
    fn queue_pending(&mut self, diffs: Vec<ChunkDiff>) {
        for diff in diffs {
            if !diff.is_well_formed() {
                warn!("Dropping malformed diff for chunk ({}, {})", diff.cx, diff.cz);
                continue;
            }
            let queued = self.pending_diffs.entry(diff.coord()).or_default();
            for entry in diff.entries {
                queued.insert(entry.local_index, entry.block_type);
            }
        }
    }

    fn refresh_target(&mut self) {
        self.interaction.update(
            self.player.eye_position(),
            self.player.look_direction(),
            &self.chunk_manager,
        );
    }

    /// Breaks the block under the crosshair.
    ///
    /// # Returns
    /// The edit to replicate, or `None` if nothing was targeted.
    pub fn break_block(&mut self) -> Option<VoxelEdit> {
        self.refresh_target();
        self.interaction.break_block(&mut self.chunk_manager)
    }

    /// Places the block in hotbar `slot` against the targeted face.
    ///
    /// # Returns
    /// The edit to replicate, or `None` if the slot is empty or placement was refused.
    pub fn place_block(&mut self, slot: usize) -> Option<VoxelEdit> {
        let block = hotbar_block(slot)?;
        self.place_block_type(block)
    }

    /// Places a specific block against the targeted face.
    pub fn place_block_type(&mut self, block: BlockType) -> Option<VoxelEdit> {
        self.refresh_target();
        self.interaction.place_block(&mut self.chunk_manager, block)
    }

    /// Applies an edit made by another player.
    ///
    /// Edits for chunks that are not loaded are kept and applied once the
    /// chunk arrives.
    pub fn apply_remote_block_edit(&mut self, position: VoxelCoord, block: BlockType) {
        let Some((coord, index)) = split_world_position(position.x, position.y, position.z) else {
            debug!("Ignoring remote edit outside the world at {:?}", position);
            return;
        };
        let diff = ChunkDiff {
            cx: coord.cx,
            cz: coord.cz,
            entries: vec![DiffEntry {
                local_index: index as u16,
                block_type: block.id(),
            }],
        };
        let pending = self.chunk_manager.apply_chunk_diffs(vec![diff]);
        self.queue_pending(pending);
    }

    /// Captures every player edit as a snapshot, one diff per chunk.
    ///
    /// Edits still waiting for an unloaded chunk are included and override
    /// recorded edits to the same voxel.
    ///
    /// # Arguments
    /// * `sequence` - Highest block-edit sequence the snapshot covers
    pub fn snapshot(&self, sequence: u32) -> WorldSnapshot {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64() * 1000.0);
        let mut merged: BTreeMap<ChunkCoord, BTreeMap<u16, BlockTypeSize>> = BTreeMap::new();
        for diff in self.chunk_manager.get_modified_chunk_diffs() {
            merged
                .entry(diff.coord())
                .or_default()
                .extend(diff.entries.iter().map(|entry| (entry.local_index, entry.block_type)));
        }
        for (coord, entries) in &self.pending_diffs {
            merged.entry(*coord).or_default().extend(entries);
        }
        let chunks = merged
            .iter()
            .map(|(coord, entries)| to_chunk_diff(*coord, entries))
            .collect();
        WorldSnapshot::new(self.config.theme, self.config.seed.clone(), timestamp_ms, sequence, chunks)
    }

    /// Switches to a saved world and queues its edits.
    ///
    /// The edits are applied as their chunks finish generating.
    pub fn resume(&mut self, snapshot: WorldSnapshot) {
        info!(
            "Resuming world {:?} ({}) with {} modified voxels",
            snapshot.seed,
            snapshot.theme,
            snapshot.entry_count()
        );
        if snapshot.seed != self.config.seed || snapshot.theme != self.config.theme {
            self.set_world(snapshot.seed, snapshot.theme);
        }
        self.queue_pending(snapshot.chunks);
        self.retry_pending_diffs();
    }

    /// Changes the world parameters. Loaded chunks, edits and pending diffs
    /// are dropped and the player respawns.
    pub fn set_world(&mut self, seed: String, theme: Theme) {
        self.config.seed = seed;
        self.config.theme = theme;
        self.pending_diffs.clear();
        self.player = PlayerState::spawn();
        self.chunk_manager.dispose();
    }

    /// Every player edit recorded so far, in wire form.
    pub fn get_modified_chunk_diffs(&self) -> Vec<ChunkDiff> {
        self.chunk_manager.get_modified_chunk_diffs()
    }

    /// Number of unloaded chunks with edits waiting for them.
    pub fn pending_diff_count(&self) -> usize {
        self.pending_diffs.len()
    }

    /// Name of the block under the crosshair
    pub fn hit_block_name(&self) -> Option<&'static str> {
        let hit = self.interaction.current_hit()?.hit;
        Some(self.chunk_manager.get_block(hit.x, hit.y, hit.z).name())
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut PlayerState {
        &mut self.player
    }

    pub fn interaction(&self) -> &BlockInteraction {
        &self.interaction
    }

    pub fn chunk_manager(&self) -> &ChunkManager {
        &self.chunk_manager
    }

    pub fn chunk_manager_mut(&mut self) -> &mut ChunkManager {
        &mut self.chunk_manager
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Releases every chunk and queued task.
    pub fn dispose(&mut self) {
        self.pending_diffs.clear();
        self.chunk_manager.dispose();
    }
}

fn to_chunk_diff(coord: ChunkCoord, entries: &BTreeMap<u16, BlockTypeSize>) -> ChunkDiff {
    ChunkDiff {
        cx: coord.cx,
        cz: coord.cz,
        entries: entries
            .iter()
            .map(|(&local_index, &block_type)| DiffEntry { local_index, block_type })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityPreset;

    fn engine() -> EngineState {
        EngineState::new(EngineConfig {
            seed: "engine-test".to_owned(),
            theme: Theme::Forest,
            quality: QualityPreset::Low,
            worker_threads: 0,
        })
    }

    fn settle(engine: &mut EngineState) {
        let idle = InputState::default();
        for _ in 0..120 {
            engine.update(Duration::from_millis(16), &idle);
            engine.flush();
        }
    }

    #[test]
    fn player_lands_on_generated_terrain() {
        let mut engine = engine();
        settle(&mut engine);
        assert_eq!(engine.chunk_manager().loaded_chunks().len(), 25);
        assert!(engine.player().on_ground);
        let feet = engine.player().position;
        assert!((feet.y - feet.y.round()).abs() < 1e-9);
        assert!(feet.y > 0.0 && feet.y < 63.0);
    }

    #[test]
    fn looking_down_breaks_and_places() {
        let mut engine = engine();
        settle(&mut engine);
        engine.player_mut().pitch = -1.5;

        let broken = engine.break_block().expect("ground below the player");
        assert!(broken.is_break());
        let p = broken.position;
        assert_eq!(engine.chunk_manager().get_block(p.x, p.y, p.z), BlockType::Air);

        let placed = engine.place_block(2).expect("face above the next block down");
        assert_eq!(placed.block, BlockType::Stone);
        let q = placed.position;
        assert_eq!(engine.chunk_manager().get_block(q.x, q.y, q.z), BlockType::Stone);
        assert!(!engine.get_modified_chunk_diffs().is_empty());
    }

    #[test]
    fn remote_edits_wait_for_their_chunk() {
        let mut engine = engine();
        engine.apply_remote_block_edit(VoxelCoord::new(3, 40, 3), BlockType::Planks);
        assert_eq!(engine.pending_diff_count(), 1);
        assert_eq!(engine.snapshot(0).chunks.len(), 1);

        settle(&mut engine);
        assert_eq!(engine.pending_diff_count(), 0);
        assert_eq!(engine.chunk_manager().get_block(3, 40, 3), BlockType::Planks);
    }

    #[test]
    fn resume_replays_snapshot_edits() {
        let mut source = engine();
        settle(&mut source);
        source.apply_remote_block_edit(VoxelCoord::new(1, 50, 1), BlockType::Cobblestone);
        let snapshot = source.snapshot(9);
        assert_eq!(snapshot.sequence, 9);

        let mut target = EngineState::new(EngineConfig {
            seed: "other".to_owned(),
            worker_threads: 0,
            quality: QualityPreset::Low,
            ..Default::default()
        });
        target.resume(snapshot);
        assert_eq!(target.config().seed, "engine-test");
        settle(&mut target);
        assert_eq!(target.chunk_manager().get_block(1, 50, 1), BlockType::Cobblestone);
    }

    #[test]
    fn snapshot_merges_pending_edits_into_recorded_chunks() {
        let mut engine = engine();
        settle(&mut engine);
        assert!(engine.chunk_manager_mut().set_block(3, 40, 3, BlockType::Stone));
        assert!(engine.chunk_manager_mut().set_block(5, 40, 3, BlockType::Dirt));

        // Walk away so chunk (0, 0) is evicted but keeps its edit log.
        engine.player_mut().position.x = 1000.0;
        engine.player_mut().position.z = 1000.0;
        engine.update(Duration::from_millis(16), &InputState::default());
        engine.flush();
        assert!(!engine.chunk_manager().is_chunk_loaded(ChunkCoord::new(0, 0)));

        engine.apply_remote_block_edit(VoxelCoord::new(3, 40, 3), BlockType::Planks);
        engine.apply_remote_block_edit(VoxelCoord::new(4, 40, 3), BlockType::Sand);
        engine.apply_remote_block_edit(VoxelCoord::new(4, 40, 3), BlockType::Snow);
        assert_eq!(engine.pending_diff_count(), 1);

        let snapshot = engine.snapshot(3);
        let origin: Vec<&ChunkDiff> = snapshot
            .chunks
            .iter()
            .filter(|diff| diff.coord() == ChunkCoord::new(0, 0))
            .collect();
        assert_eq!(origin.len(), 1);
        let index = |x: usize| split_world_position(x as i32, 40, 3).unwrap().1 as u16;
        assert_eq!(
            origin[0].entries,
            vec![
                DiffEntry { local_index: index(3), block_type: BlockType::Planks.id() },
                DiffEntry { local_index: index(4), block_type: BlockType::Snow.id() },
                DiffEntry { local_index: index(5), block_type: BlockType::Dirt.id() },
            ]
        );
        assert!(crate::engine_state::snapshot::serialize_snapshot(&snapshot).is_ok());
    }
}
