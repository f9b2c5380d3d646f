//! # Chunk Module
//!
//! This module provides the `Chunk` voxel buffer and the coordinate helpers
//! used to address it. A chunk is a 16x16x64 column of voxels stored as one
//! flat array of block identifiers.
//!
//! ## Memory Layout
//!
//! Voxels are stored in y-major order: `index = y * 256 + z * 16 + x`. A
//! horizontal slice is therefore one contiguous 256-byte run, which keeps
//! column fills during generation cache friendly.
//!
//! ## Ownership
//!
//! A `Chunk` owns its buffer outright and is moved, never shared, between the
//! generation task, the mesh task and the chunk manager. Re-meshing after an
//! edit sends a copy.

use super::block::{BlockType, BlockTypeSize};

/// Width of a chunk along X, in voxels.
pub const CHUNK_SIZE_X: i32 = 16;
/// Depth of a chunk along Z, in voxels.
pub const CHUNK_SIZE_Z: i32 = 16;
/// Height of a chunk along Y, in voxels. Also the world height.
pub const CHUNK_HEIGHT: i32 = 64;
/// Number of voxels in one horizontal slice.
pub const CHUNK_PLANE_SIZE: usize = (CHUNK_SIZE_X * CHUNK_SIZE_Z) as usize;
/// Total number of voxels in a chunk.
pub const CHUNK_VOLUME: usize = CHUNK_PLANE_SIZE * CHUNK_HEIGHT as usize;

/// Integer chunk coordinate on the horizontal grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    /// Chunk index along X.
    pub cx: i32,
    /// Chunk index along Z.
    pub cz: i32,
}

impl ChunkCoord {
    /// Creates a chunk coordinate.
    pub fn new(cx: i32, cz: i32) -> Self {
        ChunkCoord { cx, cz }
    }

    /// The chunk containing the given world voxel column.
    pub fn from_world(world_x: i32, world_z: i32) -> Self {
        ChunkCoord {
            cx: world_x.div_euclid(CHUNK_SIZE_X),
            cz: world_z.div_euclid(CHUNK_SIZE_Z),
        }
    }

    /// The chunk containing a floating point world position.
    pub fn from_world_position(x: f64, z: f64) -> Self {
        Self::from_world(x.floor() as i32, z.floor() as i32)
    }

    /// World X of this chunk's local x = 0 column.
    pub fn origin_x(&self) -> i32 {
        self.cx * CHUNK_SIZE_X
    }

    /// World Z of this chunk's local z = 0 column.
    pub fn origin_z(&self) -> i32 {
        self.cz * CHUNK_SIZE_Z
    }

    /// Chebyshev distance in chunks, the metric used for the view-distance square.
    pub fn chebyshev_distance(&self, other: &ChunkCoord) -> i32 {
        (self.cx - other.cx).abs().max((self.cz - other.cz).abs())
    }
}

/// Local voxel position inside a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalPosition {
    /// 0..16
    pub x: usize,
    /// 0..64
    pub y: usize,
    /// 0..16
    pub z: usize,
}

/// Flat buffer index of a local voxel. Callers must pass in-range coordinates.
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    y * CHUNK_PLANE_SIZE + z * CHUNK_SIZE_X as usize + x
}

/// Inverse of [`voxel_index`].
#[inline]
pub fn local_position(index: usize) -> LocalPosition {
    let y = index / CHUNK_PLANE_SIZE;
    let rem = index % CHUNK_PLANE_SIZE;
    LocalPosition {
        x: rem % CHUNK_SIZE_X as usize,
        y,
        z: rem / CHUNK_SIZE_X as usize,
    }
}

/// Splits a world voxel coordinate into its chunk and in-chunk index.
///
/// # Returns
/// `None` when `world_y` lies outside the world's vertical range.
pub fn split_world_position(world_x: i32, world_y: i32, world_z: i32) -> Option<(ChunkCoord, usize)> {
    if !(0..CHUNK_HEIGHT).contains(&world_y) {
        return None;
    }
    let coord = ChunkCoord::from_world(world_x, world_z);
    let lx = world_x.rem_euclid(CHUNK_SIZE_X) as usize;
    let lz = world_z.rem_euclid(CHUNK_SIZE_Z) as usize;
    Some((coord, voxel_index(lx, world_y as usize, lz)))
}

/// One chunk's voxel data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Where the chunk sits on the chunk grid.
    pub coord: ChunkCoord,
    voxels: Box<[BlockTypeSize]>,
}

impl Chunk {
    /// Creates a chunk filled with air.
    pub fn empty(coord: ChunkCoord) -> Self {
        Self::filled(coord, BlockType::Air)
    }

    /// Creates a chunk where every voxel is `block`.
    pub fn filled(coord: ChunkCoord, block: BlockType) -> Self {
        Chunk {
            coord,
            voxels: vec![block.id(); CHUNK_VOLUME].into_boxed_slice(),
        }
    }

    /// Wraps an existing buffer.
    ///
    /// # Returns
    /// `None` if the buffer is not exactly [`CHUNK_VOLUME`] voxels long.
    pub fn from_voxels(coord: ChunkCoord, voxels: Vec<BlockTypeSize>) -> Option<Self> {
        if voxels.len() != CHUNK_VOLUME {
            return None;
        }
        Some(Chunk {
            coord,
            voxels: voxels.into_boxed_slice(),
        })
    }

    /// Raw identifier at a local position, or air outside the chunk.
    pub fn get(&self, x: i32, y: i32, z: i32) -> BlockTypeSize {
        if !Self::in_bounds(x, y, z) {
            return BlockType::Air.id();
        }
        self.voxels[voxel_index(x as usize, y as usize, z as usize)]
    }

    /// Writes a voxel at a local position. Out of range writes are ignored.
    pub fn set(&mut self, x: i32, y: i32, z: i32, block: BlockTypeSize) {
        if Self::in_bounds(x, y, z) {
            self.voxels[voxel_index(x as usize, y as usize, z as usize)] = block;
        }
    }

    /// Identifier at a flat index.
    pub fn get_index(&self, index: usize) -> BlockTypeSize {
        self.voxels[index]
    }

    /// Writes a flat index.
    pub fn set_index(&mut self, index: usize, block: BlockTypeSize) {
        self.voxels[index] = block;
    }

    /// Read-only view of the whole buffer.
    pub fn voxels(&self) -> &[BlockTypeSize] {
        &self.voxels
    }

    /// Whether every voxel is air.
    pub fn is_empty(&self) -> bool {
        self.voxels.iter().all(|&v| v == BlockType::Air.id())
    }

    /// Whether a local coordinate lies within the chunk.
    #[inline]
    pub fn in_bounds(x: i32, y: i32, z: i32) -> bool {
        (0..CHUNK_SIZE_X).contains(&x) && (0..CHUNK_HEIGHT).contains(&y) && (0..CHUNK_SIZE_Z).contains(&z)
    }
}

/// One modified voxel inside a chunk diff.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    /// Flat voxel index, 0..16384.
    pub local_index: u16,
    /// Block identifier written at that index.
    pub block_type: BlockTypeSize,
}

/// The sparse, player-authored modifications of one chunk.
///
/// This is the wire and storage form of a chunk's modification log. Entry
/// order is preserved through serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDiff {
    /// Chunk index along X.
    pub cx: i32,
    /// Chunk index along Z.
    pub cz: i32,
    /// Modified voxels.
    pub entries: Vec<DiffEntry>,
}

impl ChunkDiff {
    /// The chunk this diff targets.
    pub fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.cx, self.cz)
    }

    /// A diff is applicable only if every entry addresses a voxel inside the
    /// chunk and names a known block type.
    pub fn is_well_formed(&self) -> bool {
        self.entries.iter().all(|entry| {
            (entry.local_index as usize) < CHUNK_VOLUME && BlockType::from_id(entry.block_type).is_some()
        })
    }
}
