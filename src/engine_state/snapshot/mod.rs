//! # Snapshot Module
//!
//! Save/load form of a world: the seed and theme needed to regenerate the
//! terrain plus every player edit as sparse chunk diffs.
//!
//! ## Binary Layout
//!
//! All multi-byte fields are big-endian.
//!
//! | field | type |
//! |---|---|
//! | magic `0x56585300` | u32 |
//! | version | u8 |
//! | theme index | u8 |
//! | seed length, seed bytes (UTF-8) | u32, \[u8\] |
//! | timestamp (ms) | f64 |
//! | sequence | u32 |
//! | chunk count | u32 |
//!
//! followed by `chunk count` records of `i32 cx, i32 cz, u32 entry count`,
//! each followed by `entry count` pairs of `u16 local index, u8 block type`.
//!
//! Chunk and entry order are preserved exactly through a round trip.

pub mod codec;
pub mod compression;

pub use codec::{deserialize_snapshot, serialize_snapshot, serialized_len};
pub use compression::{compress_snapshot, decompress_snapshot};

use crate::engine_state::voxels::{chunk::ChunkDiff, generation::Theme};

/// Largest decompressed snapshot accepted when loading.
pub const MAX_SNAPSHOT_BYTES: usize = 64 * 1024 * 1024;

/// `"VXS\0"`
pub const SNAPSHOT_MAGIC: u32 = 0x5658_5300;
/// The only format version this codec reads and writes.
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// A saved world.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldSnapshot {
    pub format_version: u8,
    pub theme: Theme,
    pub seed: String,
    /// Wall-clock time the snapshot was taken, in milliseconds
    pub timestamp_ms: f64,
    /// Highest block-edit sequence folded into this snapshot
    pub sequence: u32,
    pub chunks: Vec<ChunkDiff>,
}

impl WorldSnapshot {
    /// Creates a snapshot at the current format version.
    pub fn new(theme: Theme, seed: impl Into<String>, timestamp_ms: f64, sequence: u32, chunks: Vec<ChunkDiff>) -> Self {
        WorldSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            theme,
            seed: seed.into(),
            timestamp_ms,
            sequence,
            chunks,
        }
    }

    /// Total number of modified voxels across all chunks
    pub fn entry_count(&self) -> usize {
        self.chunks.iter().map(|diff| diff.entries.len()).sum()
    }
}
