//! Greedy meshing implementation for voxel rendering.
//!
//! Each axis is swept slice by slice. At every slice boundary a 2D mask is
//! built over the two perpendicular axes; a cell holds the block type of the
//! visible face, positive when the face points along the axis and negative
//! when it points against it. Rectangles of equal mask value are then grown
//! greedily (maximal width first, then maximal height) and emitted as single
//! quads, so a flat 16x16 floor becomes one quad instead of 256.
//!
//! Air and water are both transparent: a face is visible only between a
//! transparent and an opaque voxel, and water never gets faces of its own.

use crate::engine_state::voxels::{
    block::{block_type::is_transparent_id, BlockType, BlockTypeSize},
    chunk::{Chunk, CHUNK_HEIGHT, CHUNK_SIZE_X, CHUNK_SIZE_Z},
};

use super::mesh::MeshData;

/// Size of one atlas tile in UV space. The atlas is a single row of 16 tiles.
pub const ATLAS_TILE_SIZE: f32 = 1.0 / 16.0;

const DIMS: [i32; 3] = [CHUNK_SIZE_X, CHUNK_HEIGHT, CHUNK_SIZE_Z];

/// Left edge of a block's tile in the atlas.
pub fn atlas_u(block: BlockTypeSize) -> f32 {
    (block as f32 - 1.0) * ATLAS_TILE_SIZE
}

/// Meshes a chunk treating everything outside it as air.
///
/// This is what the chunk manager uses: faces on chunk borders are always
/// emitted, and neighbours are never consulted.
pub fn greedy_mesh(chunk: &Chunk) -> MeshData {
    greedy_mesh_with_boundary(chunk, |_, _, _| BlockType::Air.id())
}

/// Meshes a chunk, sampling voxels outside it through `boundary`.
///
/// # Arguments
/// * `chunk` - The voxels to mesh
/// * `boundary` - Returns the block at a chunk-local coordinate lying outside
///   the chunk (one of the coordinates is `-1` or equal to the chunk size)
///
/// # Returns
/// The merged quads. Deterministic for a given input.
pub fn greedy_mesh_with_boundary<F>(chunk: &Chunk, boundary: F) -> MeshData
where
    F: Fn(i32, i32, i32) -> BlockTypeSize,
{
    let sample = |p: [i32; 3]| -> BlockTypeSize {
        if Chunk::in_bounds(p[0], p[1], p[2]) {
            chunk.get(p[0], p[1], p[2])
        } else {
            boundary(p[0], p[1], p[2])
        }
    };

    let mut mesh = MeshData::new();

    for axis in 0..3 {
        let u = (axis + 1) % 3;
        let v = (axis + 2) % 3;
        let (width, height) = (DIMS[u] as usize, DIMS[v] as usize);
        let mut mask = vec![0i32; width * height];

        let mut step = [0i32; 3];
        step[axis] = 1;

        let mut pos = [0i32; 3];
        pos[axis] = -1;
        while pos[axis] < DIMS[axis] {
            let mut n = 0;
            for j in 0..DIMS[v] {
                pos[v] = j;
                for i in 0..DIMS[u] {
                    pos[u] = i;
                    let a = sample(pos);
                    let b = sample([pos[0] + step[0], pos[1] + step[1], pos[2] + step[2]]);
                    let a_clear = is_transparent_id(a);
                    let b_clear = is_transparent_id(b);
                    mask[n] = if a_clear == b_clear {
                        0
                    } else if b_clear {
                        a as i32
                    } else {
                        -(b as i32)
                    };
                    n += 1;
                }
            }

            pos[axis] += 1;
            emit_slice(&mut mesh, &mut mask, axis, u, v, pos[axis]);
        }
    }

    mesh
}

/// Greedily merges one slice mask into quads lying on plane `plane` of `axis`.
fn emit_slice(mesh: &mut MeshData, mask: &mut [i32], axis: usize, u: usize, v: usize, plane: i32) {
    let width = DIMS[u] as usize;
    let height = DIMS[v] as usize;

    let mut n = 0;
    for j in 0..height {
        let mut i = 0;
        while i < width {
            let value = mask[n];
            if value == 0 {
                i += 1;
                n += 1;
                continue;
            }

            let mut w = 1;
            while i + w < width && mask[n + w] == value {
                w += 1;
            }

            let mut h = 1;
            'grow: while j + h < height {
                for k in 0..w {
                    if mask[n + k + h * width] != value {
                        break 'grow;
                    }
                }
                h += 1;
            }

            push_face(mesh, value, axis, u, v, plane, i, j, w, h);

            for dy in 0..h {
                for dx in 0..w {
                    mask[n + dx + dy * width] = 0;
                }
            }

            i += w;
            n += w;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn push_face(
    mesh: &mut MeshData,
    value: i32,
    axis: usize,
    u: usize,
    v: usize,
    plane: i32,
    i: usize,
    j: usize,
    w: usize,
    h: usize,
) {
    let mut origin = [0.0f32; 3];
    origin[axis] = plane as f32;
    origin[u] = i as f32;
    origin[v] = j as f32;

    let mut du = [0.0f32; 3];
    du[u] = w as f32;
    let mut dv = [0.0f32; 3];
    dv[v] = h as f32;

    let v0 = origin;
    let v1 = [origin[0] + du[0], origin[1] + du[1], origin[2] + du[2]];
    let v2 = [v1[0] + dv[0], v1[1] + dv[1], v1[2] + dv[2]];
    let v3 = [origin[0] + dv[0], origin[1] + dv[1], origin[2] + dv[2]];

    let mut normal = [0.0f32; 3];
    normal[axis] = if value > 0 { 1.0 } else { -1.0 };

    let block = value.unsigned_abs() as BlockTypeSize;
    let au = atlas_u(block);
    let uvs = [
        [au, ATLAS_TILE_SIZE],
        [au + ATLAS_TILE_SIZE * w as f32, ATLAS_TILE_SIZE],
        [au + ATLAS_TILE_SIZE * w as f32, 0.0],
        [au, 0.0],
    ];

    // Reversed corner order keeps counter-clockwise winding for back faces.
    let corners = if value > 0 { [v0, v1, v2, v3] } else { [v0, v3, v2, v1] };
    mesh.push_quad(corners, normal, uvs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::chunk::ChunkCoord;

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
    }

    fn corner(mesh: &MeshData, index: u32) -> [f32; 3] {
        let i = index as usize * 3;
        [mesh.vertices[i], mesh.vertices[i + 1], mesh.vertices[i + 2]]
    }

    #[test]
    fn empty_chunk_has_no_faces() {
        let mesh = greedy_mesh(&Chunk::empty(ChunkCoord::new(0, 0)));
        assert!(mesh.is_empty());
        assert!(mesh.vertices.is_empty() && mesh.normals.is_empty() && mesh.uvs.is_empty());
    }

    #[test]
    fn solid_chunk_inside_solid_neighbours_has_no_faces() {
        let chunk = Chunk::filled(ChunkCoord::new(0, 0), BlockType::Stone);
        let mesh = greedy_mesh_with_boundary(&chunk, |_, _, _| BlockType::Stone.id());
        assert!(mesh.is_empty());
    }

    #[test]
    fn isolated_voxel_produces_six_quads() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        chunk.set(5, 10, 7, BlockType::Dirt.id());
        let mesh = greedy_mesh(&chunk);
        assert_eq!(mesh.quad_count(), 6);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.uvs.len(), 48);
    }

    #[test]
    fn flat_floor_merges_into_one_quad_per_side() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        for x in 0..CHUNK_SIZE_X {
            for z in 0..CHUNK_SIZE_Z {
                chunk.set(x, 0, z, BlockType::Grass.id());
            }
        }
        let mesh = greedy_mesh(&chunk);
        assert_eq!(mesh.quad_count(), 6);
    }

    #[test]
    fn water_is_never_meshed_and_does_not_hide_faces() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        chunk.set(4, 4, 4, BlockType::Water.id());
        assert!(greedy_mesh(&chunk).is_empty());

        chunk.set(4, 3, 4, BlockType::Sand.id());
        assert_eq!(greedy_mesh(&chunk).quad_count(), 6);
    }

    #[test]
    fn triangle_winding_matches_normals() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        chunk.set(1, 1, 1, BlockType::Stone.id());
        let mesh = greedy_mesh(&chunk);
        for tri in mesh.indices.chunks(3) {
            let (a, b, c) = (corner(&mesh, tri[0]), corner(&mesh, tri[1]), corner(&mesh, tri[2]));
            let n = cross(
                [b[0] - a[0], b[1] - a[1], b[2] - a[2]],
                [c[0] - a[0], c[1] - a[1], c[2] - a[2]],
            );
            let i = tri[0] as usize * 3;
            let normal = [mesh.normals[i], mesh.normals[i + 1], mesh.normals[i + 2]];
            let dot = n[0] * normal[0] + n[1] * normal[1] + n[2] * normal[2];
            assert!(dot > 0.0);
        }
    }

    #[test]
    fn uvs_select_the_block_tile_and_repeat_with_width() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        chunk.set(0, 0, 0, BlockType::Stone.id());
        chunk.set(0, 0, 1, BlockType::Stone.id());
        chunk.set(0, 0, 2, BlockType::Stone.id());
        let mesh = greedy_mesh(&chunk);
        let au = atlas_u(BlockType::Stone.id());
        assert!((au - 2.0 / 16.0).abs() < 1e-6);
        // First quad is the -X face: u runs along Y (width 1), v along Z.
        assert!((mesh.uvs[0] - au).abs() < 1e-6);
        let widest = mesh
            .uvs
            .chunks(8)
            .map(|quad| quad[2] - quad[0])
            .fold(0.0f32, f32::max);
        assert!((widest - 3.0 * ATLAS_TILE_SIZE).abs() < 1e-6);
    }

    #[test]
    fn meshing_is_deterministic() {
        let mut chunk = Chunk::empty(ChunkCoord::new(0, 0));
        for i in 0..20 {
            chunk.set(i % 16, i, (i * 3) % 16, (i % 12 + 1) as u8);
        }
        assert_eq!(greedy_mesh(&chunk), greedy_mesh(&chunk));
    }
}
