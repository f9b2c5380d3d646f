//! Chunk voxel generation.
//!
//! `generate_chunk` is a pure function of `(coord, seed, biome)`: heights come
//! from four octaves of seeded noise, columns are filled top-down by layer
//! rules, and trees are stamped where a position hash falls under the
//! theme's tree chance.

use crate::engine_state::voxels::{
    block::BlockType,
    chunk::{Chunk, ChunkCoord, CHUNK_HEIGHT, CHUNK_SIZE_X, CHUNK_SIZE_Z},
};

use super::{noise::NoiseGenerator, theme::BiomeConfig};

const HEIGHT_OCTAVES: u32 = 4;
const HEIGHT_LACUNARITY: f64 = 2.0;
const HEIGHT_PERSISTENCE: f64 = 0.5;

/// Columns closer than this to a chunk edge never grow trees, so canopies
/// stay inside the chunk that owns them.
const TREE_EDGE_MARGIN: i32 = 2;
/// Minimum headroom between a tree's base column height and the world ceiling.
const TREE_HEADROOM: i32 = 8;

/// Deterministic hash of a world column and seed onto `[0, 1)`.
///
/// Runs a 32-bit wrapping `h * 31 + unit` hash over the UTF-16 units of
/// `"<x>,<z>,<seed>"`. The seed is opaque data here; any string is valid.
pub fn position_hash(world_x: i32, world_z: i32, seed: &str) -> f64 {
    let key = format!("{world_x},{world_z},{seed}");
    let mut h: i32 = 0;
    for unit in key.encode_utf16() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32);
    }
    ((h & 0x7fff_ffff) % 10_000) as f64 / 10_000.0
}

/// Surface height of a world column, clamped to the world's vertical range.
pub fn column_height(noise: &NoiseGenerator, biome: &BiomeConfig, world_x: i32, world_z: i32) -> i32 {
    let sample = noise.fbm2d(
        world_x as f64 * biome.terrain_scale,
        world_z as f64 * biome.terrain_scale,
        HEIGHT_OCTAVES,
        HEIGHT_LACUNARITY,
        HEIGHT_PERSISTENCE,
    );
    let height = (biome.base_height as f64 + sample * biome.height_variation).floor() as i32;
    height.clamp(0, CHUNK_HEIGHT - 1)
}

/// Block for voxel `y` of a column whose surface sits at `height`.
fn column_block(biome: &BiomeConfig, y: i32, height: i32) -> BlockType {
    if y == 0 {
        biome.deep_block
    } else if y < height - 4 {
        biome.deep_block
    } else if y < height - 1 {
        biome.subsurface_block
    } else if y == height {
        if (height - biome.water_level).abs() <= 1 {
            biome.shore_block
        } else {
            biome.surface_block
        }
    } else if y <= height {
        biome.subsurface_block
    } else if y <= biome.water_level {
        biome.water_block
    } else {
        BlockType::Air
    }
}

/// Generates the voxels of one chunk.
///
/// # Arguments
/// * `coord` - Chunk to generate
/// * `seed` - Room seed, used only for tree placement hashing here; the
///   height field comes from `noise`, which must have been built from the
///   same seed
/// * `noise` - Noise generator for the seed
/// * `biome` - Theme parameters
///
/// # Returns
/// A fully populated chunk. Generation cannot fail.
pub fn generate_chunk(coord: ChunkCoord, seed: &str, noise: &NoiseGenerator, biome: &BiomeConfig) -> Chunk {
    let mut chunk = Chunk::empty(coord);
    let origin_x = coord.origin_x();
    let origin_z = coord.origin_z();

    for lx in 0..CHUNK_SIZE_X {
        for lz in 0..CHUNK_SIZE_Z {
            let world_x = origin_x + lx;
            let world_z = origin_z + lz;
            let height = column_height(noise, biome, world_x, world_z);

            for y in 0..CHUNK_HEIGHT {
                chunk.set(lx, y, lz, column_block(biome, y, height).id());
            }

            let away_from_edge = (TREE_EDGE_MARGIN..CHUNK_SIZE_X - TREE_EDGE_MARGIN).contains(&lx)
                && (TREE_EDGE_MARGIN..CHUNK_SIZE_Z - TREE_EDGE_MARGIN).contains(&lz);
            if away_from_edge
                && height > biome.water_level + 1
                && height < CHUNK_HEIGHT - TREE_HEADROOM
                && position_hash(world_x, world_z, seed) < biome.tree_chance
            {
                place_tree(&mut chunk, lx, height + 1, lz, biome);
            }
        }
    }

    chunk
}

/// Stamps a trunk and a tapering canopy rooted at local `(x, base_y, z)`.
fn place_tree(chunk: &mut Chunk, x: i32, base_y: i32, z: i32, biome: &BiomeConfig) {
    // Height depends on position only, never on the placement hash.
    let trunk_height = 4 + (x * 7 + z * 13) % 3;

    for dy in 0..trunk_height {
        let y = base_y + dy;
        if y >= CHUNK_HEIGHT {
            return;
        }
        chunk.set(x, y, z, biome.tree_trunk_block.id());
    }

    let leaf_start = base_y + trunk_height - 1;
    for dy in -1..=2 {
        let y = leaf_start + dy;
        if !(0..CHUNK_HEIGHT).contains(&y) {
            continue;
        }
        let radius: i32 = if dy <= 0 { 2 } else { 1 };
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                if dx == 0 && dz == 0 && dy < 2 {
                    continue;
                }
                if dx.abs() == radius && dz.abs() == radius && dy > 0 {
                    continue;
                }
                let (nx, nz) = (x + dx, z + dz);
                if !Chunk::in_bounds(nx, y, nz) {
                    continue;
                }
                if chunk.get(nx, y, nz) == BlockType::Air.id() {
                    chunk.set(nx, y, nz, biome.tree_leaf_block.id());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::generation::theme::{Theme, ALL_THEMES};

    fn generate(seed: &str, theme: Theme, coord: ChunkCoord) -> Chunk {
        let noise = NoiseGenerator::new(seed);
        generate_chunk(coord, seed, &noise, &theme.config())
    }

    #[test]
    fn generation_is_deterministic() {
        for theme in ALL_THEMES {
            let coord = ChunkCoord::new(3, -2);
            let a = generate("abc", theme, coord);
            let b = generate("abc", theme, coord);
            assert_eq!(a.voxels(), b.voxels());
        }
    }

    #[test]
    fn bedrock_is_always_present() {
        let chunk = generate("bedrock", Theme::Coast, ChunkCoord::new(0, 0));
        for x in 0..CHUNK_SIZE_X {
            for z in 0..CHUNK_SIZE_Z {
                assert_eq!(chunk.get(x, 0, z), BlockType::Stone.id());
            }
        }
    }

    #[test]
    fn columns_follow_layer_order() {
        let seed = "layers";
        let biome = Theme::Forest.config();
        let noise = NoiseGenerator::new(seed);
        let chunk = generate_chunk(ChunkCoord::new(1, 1), seed, &noise, &biome);
        for lx in 0..CHUNK_SIZE_X {
            for lz in 0..CHUNK_SIZE_Z {
                let height = column_height(&noise, &biome, 16 + lx, 16 + lz);
                if height >= 6 {
                    assert_eq!(chunk.get(lx, height - 5, lz), biome.deep_block.id());
                    assert_eq!(chunk.get(lx, height - 2, lz), biome.subsurface_block.id());
                }
                let top = chunk.get(lx, height, lz);
                assert!(top == biome.surface_block.id() || top == biome.shore_block.id());
                if height < biome.water_level {
                    assert_eq!(chunk.get(lx, biome.water_level, lz), biome.water_block.id());
                }
            }
        }
    }

    #[test]
    fn position_hash_is_stable_and_bounded() {
        let a = position_hash(10, -4, "abc");
        assert_eq!(a, position_hash(10, -4, "abc"));
        assert!((0.0..1.0).contains(&a));
        assert!((0.0..1.0).contains(&position_hash(i32::MIN, i32::MAX, "\u{1f600}")));
    }

    #[test]
    fn trees_stay_inside_the_chunk_and_only_replace_air() {
        let biome = BiomeConfig {
            tree_chance: 1.0,
            ..Theme::Forest.config()
        };
        let mut chunk = Chunk::filled(ChunkCoord::new(0, 0), BlockType::Air);
        for x in 0..CHUNK_SIZE_X {
            for z in 0..CHUNK_SIZE_Z {
                chunk.set(x, 20, z, BlockType::Grass.id());
            }
        }
        chunk.set(9, 25, 8, BlockType::Stone.id());
        place_tree(&mut chunk, 8, 21, 8, &biome);

        let trunk_height = 4 + (8 * 7 + 8 * 13) % 3;
        for dy in 0..trunk_height {
            assert_eq!(chunk.get(8, 21 + dy, 8), BlockType::WoodLog.id());
        }
        assert_eq!(chunk.get(9, 25, 8), BlockType::Stone.id());
        assert_eq!(chunk.get(8, 21 + trunk_height - 1 + 2, 8), BlockType::Leaves.id());
    }
}
