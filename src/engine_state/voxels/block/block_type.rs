//! # Block Type Module
//!
//! This module defines the different types of blocks in the voxel world.
//! It provides conversion from the compact storage integer, display names and
//! the transparency rule shared by meshing, raycasting and collision.

use std::fmt;

use num_derive::FromPrimitive;
use phf::phf_map;

use super::BlockTypeSize;

/// Enumerates all block types in the voxel world.
///
/// The discriminants are the on-disk and on-wire block identifiers, so they
/// must never be renumbered. The `FromPrimitive` derive allows conversion
/// from the raw `BlockTypeSize` stored in voxel buffers.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum BlockType {
    /// Empty space. Transparent and non-solid.
    Air = 0,
    /// Grass-topped soil, the forest surface block.
    Grass = 1,
    /// Plain soil.
    Dirt = 2,
    /// Stone, used for deep terrain and bedrock.
    Stone = 3,
    /// Sand, the coast surface block and shoreline.
    Sand = 4,
    /// Water. Transparent like air for meshing, raycasting and collision.
    Water = 5,
    /// Tree trunk.
    WoodLog = 6,
    /// Crafted wood planks.
    Planks = 7,
    /// Tree canopy.
    Leaves = 8,
    /// Snow, the snow theme surface block.
    Snow = 9,
    /// Frozen water. Unlike water, ice is solid.
    Ice = 10,
    /// Pale stone used below snow.
    WhiteStone = 11,
    /// Cobblestone.
    Cobblestone = 12,
}

/// Block lookup by the lowercase identifier used in configuration files.
static BLOCKS_BY_KEY: phf::Map<&'static str, BlockType> = phf_map! {
    "air" => BlockType::Air,
    "grass" => BlockType::Grass,
    "dirt" => BlockType::Dirt,
    "stone" => BlockType::Stone,
    "sand" => BlockType::Sand,
    "water" => BlockType::Water,
    "wood_log" => BlockType::WoodLog,
    "planks" => BlockType::Planks,
    "leaves" => BlockType::Leaves,
    "snow" => BlockType::Snow,
    "ice" => BlockType::Ice,
    "white_stone" => BlockType::WhiteStone,
    "cobblestone" => BlockType::Cobblestone,
};

impl BlockType {
    /// Converts a stored block identifier into a `BlockType`.
    ///
    /// # Returns
    /// `None` when the identifier does not name a known block.
    pub fn from_id(id: BlockTypeSize) -> Option<Self> {
        num::FromPrimitive::from_u8(id)
    }

    /// Resolves a lowercase block key such as `"wood_log"`.
    pub fn from_key(key: &str) -> Option<Self> {
        BLOCKS_BY_KEY.get(key).copied()
    }

    /// The compact identifier stored in voxel buffers.
    pub fn id(self) -> BlockTypeSize {
        self as BlockTypeSize
    }

    /// Air and water are see-through: they never occlude a neighbouring face,
    /// never stop a targeting ray and never block movement.
    pub fn is_transparent(self) -> bool {
        matches!(self, BlockType::Air | BlockType::Water)
    }

    /// Whether the block collides with the player and stops raycasts.
    pub fn is_solid(self) -> bool {
        !self.is_transparent()
    }

    /// Display name shown in the HUD.
    pub fn name(self) -> &'static str {
        match self {
            BlockType::Air => "Air",
            BlockType::Grass => "Grass",
            BlockType::Dirt => "Dirt",
            BlockType::Stone => "Stone",
            BlockType::Sand => "Sand",
            BlockType::Water => "Water",
            BlockType::WoodLog => "Wood Log",
            BlockType::Planks => "Planks",
            BlockType::Leaves => "Leaves",
            BlockType::Snow => "Snow",
            BlockType::Ice => "Ice",
            BlockType::WhiteStone => "White Stone",
            BlockType::Cobblestone => "Cobblestone",
        }
    }
}

/// Transparency test on a raw voxel value. Unknown identifiers are treated as
/// opaque so corrupt data is at least visible.
pub fn is_transparent_id(id: BlockTypeSize) -> bool {
    id == BlockType::Air as BlockTypeSize || id == BlockType::Water as BlockTypeSize
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
