//! Static per-theme biome parameters.
//!
//! A room picks one of three themes at creation time. The theme selects the
//! height curve, block palette, water level and tree density used by the
//! generator, plus the sky and fog parameters handed to the render layer.

use std::fmt;

use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::engine_state::voxels::block::BlockType;

/// World theme. The discriminant is the snapshot `themeIndex`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Rolling grass hills with dense trees.
    Forest = 0,
    /// Snow fields over white stone, frozen lakes.
    Snow = 1,
    /// Low sandy terrain with a high water line.
    Coast = 2,
}

static THEMES_BY_NAME: phf::Map<&'static str, Theme> = phf_map! {
    "forest" => Theme::Forest,
    "snow" => Theme::Snow,
    "coast" => Theme::Coast,
};

/// Every theme in snapshot index order.
pub const ALL_THEMES: [Theme; 3] = [Theme::Forest, Theme::Snow, Theme::Coast];

/// Terrain and atmosphere parameters for one theme.
#[derive(Clone, Debug, PartialEq)]
pub struct BiomeConfig {
    /// Mean surface height in voxels.
    pub base_height: i32,
    /// Amplitude applied to the normalised height noise.
    pub height_variation: f64,
    /// World-to-noise coordinate scale.
    pub terrain_scale: f64,
    /// Top voxel of each column.
    pub surface_block: BlockType,
    /// The few voxels below the surface.
    pub subsurface_block: BlockType,
    /// Everything deeper, and the bedrock layer.
    pub deep_block: BlockType,
    /// Columns below this height are flooded up to it.
    pub water_level: i32,
    /// Block used to flood low columns.
    pub water_block: BlockType,
    /// Surface block for columns within one voxel of the water level.
    pub shore_block: BlockType,
    /// Probability in `[0, 1)` that an eligible column grows a tree.
    pub tree_chance: f64,
    /// Tree trunk block.
    pub tree_trunk_block: BlockType,
    /// Tree canopy block.
    pub tree_leaf_block: BlockType,
    /// Sky colour as `0xRRGGBB`.
    pub sky_color: u32,
    /// Fog colour as `0xRRGGBB`.
    pub fog_color: u32,
    /// Distance at which fog starts.
    pub fog_near: f32,
    /// Distance at which fog is opaque.
    pub fog_far: f32,
    /// Directional light intensity.
    pub sun_intensity: f32,
    /// Ambient light intensity.
    pub ambient_intensity: f32,
}

impl Theme {
    /// Resolves a lowercase theme name.
    pub fn from_name(name: &str) -> Option<Self> {
        THEMES_BY_NAME.get(name).copied()
    }

    /// Resolves a snapshot theme index.
    pub fn from_index(index: u8) -> Option<Self> {
        ALL_THEMES.get(index as usize).copied()
    }

    /// The snapshot theme index.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Lowercase name as used on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Theme::Forest => "forest",
            Theme::Snow => "snow",
            Theme::Coast => "coast",
        }
    }

    /// Biome parameters for this theme.
    pub fn config(self) -> BiomeConfig {
        match self {
            Theme::Forest => BiomeConfig {
                base_height: 20,
                height_variation: 12.0,
                terrain_scale: 0.02,
                surface_block: BlockType::Grass,
                subsurface_block: BlockType::Dirt,
                deep_block: BlockType::Stone,
                water_level: 14,
                water_block: BlockType::Water,
                shore_block: BlockType::Sand,
                tree_chance: 0.02,
                tree_trunk_block: BlockType::WoodLog,
                tree_leaf_block: BlockType::Leaves,
                sky_color: 0x87ceeb,
                fog_color: 0xc8e6c9,
                fog_near: 80.0,
                fog_far: 220.0,
                sun_intensity: 1.0,
                ambient_intensity: 0.6,
            },
            Theme::Snow => BiomeConfig {
                base_height: 22,
                height_variation: 15.0,
                terrain_scale: 0.018,
                surface_block: BlockType::Snow,
                subsurface_block: BlockType::WhiteStone,
                deep_block: BlockType::Stone,
                water_level: 16,
                water_block: BlockType::Ice,
                shore_block: BlockType::Snow,
                tree_chance: 0.008,
                tree_trunk_block: BlockType::WoodLog,
                tree_leaf_block: BlockType::Snow,
                sky_color: 0xd6e8f0,
                fog_color: 0xe8eef2,
                fog_near: 60.0,
                fog_far: 180.0,
                sun_intensity: 0.8,
                ambient_intensity: 0.7,
            },
            Theme::Coast => BiomeConfig {
                base_height: 16,
                height_variation: 8.0,
                terrain_scale: 0.025,
                surface_block: BlockType::Sand,
                subsurface_block: BlockType::Sand,
                deep_block: BlockType::Stone,
                water_level: 18,
                water_block: BlockType::Water,
                shore_block: BlockType::Sand,
                tree_chance: 0.01,
                tree_trunk_block: BlockType::WoodLog,
                tree_leaf_block: BlockType::Leaves,
                sky_color: 0x7ec8e3,
                fog_color: 0xb3d9e8,
                fog_near: 100.0,
                fog_far: 250.0,
                sun_intensity: 1.2,
                ambient_intensity: 0.65,
            },
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_indices_agree() {
        for theme in ALL_THEMES {
            assert_eq!(Theme::from_name(theme.name()), Some(theme));
            assert_eq!(Theme::from_index(theme.index()), Some(theme));
        }
        assert_eq!(Theme::from_index(3), None);
        assert_eq!(Theme::from_name("desert"), None);
    }

    #[test]
    fn snow_freezes_its_water() {
        let config = Theme::Snow.config();
        assert_eq!(config.water_block, BlockType::Ice);
        assert_eq!(config.tree_leaf_block, BlockType::Snow);
    }
}
