//! # Block Module
//!
//! Block catalogue for the voxel world: the block type enum, the compact
//! storage integer it is encoded as, and the hotbar palette offered to the
//! player for placement.

pub mod block_type;

pub use block_type::BlockType;

/// The underlying integer type used to represent block types in voxel buffers,
/// chunk diffs and the snapshot format.
pub type BlockTypeSize = u8;

/// Blocks the player can place, in hotbar slot order.
pub const HOTBAR_BLOCKS: [BlockType; 9] = [
    BlockType::Grass,
    BlockType::Dirt,
    BlockType::Stone,
    BlockType::Sand,
    BlockType::WoodLog,
    BlockType::Planks,
    BlockType::Cobblestone,
    BlockType::Leaves,
    BlockType::Snow,
];

/// Returns the block in the given hotbar slot, or `None` for an empty slot.
pub fn hotbar_block(slot: usize) -> Option<BlockType> {
    HOTBAR_BLOCKS.get(slot).copied()
}
