//! # Block Interaction
//!
//! Voxel targeting and the local break/place rules.
//!
//! Targeting walks the grid along the view ray with a 3D DDA, visiting every
//! voxel the ray passes through in order, and stops at the first voxel that
//! is neither air nor water. The voxel visited just before it is the face
//! voxel, which is where a placed block goes.

use cgmath::{Point3, Vector3};
use log::debug;

use crate::engine_state::voxels::{block::BlockType, chunk_manager::ChunkManager};

/// Maximum ray length in voxels.
pub const MAX_REACH: f64 = 8.0;

/// Integer world voxel coordinate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        VoxelCoord { x, y, z }
    }
}

/// Result of a successful raycast.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RaycastHit {
    /// First solid voxel along the ray
    pub hit: VoxelCoord,
    /// Voxel visited immediately before `hit`. Equals `hit` when the ray
    /// starts inside a solid voxel.
    pub face: VoxelCoord,
}

/// A voxel write performed by the local player.
///
/// Returned by break/place so the caller can replicate it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VoxelEdit {
    pub position: VoxelCoord,
    /// `Air` for a break
    pub block: BlockType,
}

impl VoxelEdit {
    /// Whether this edit removed a block
    pub fn is_break(&self) -> bool {
        self.block == BlockType::Air
    }
}

fn axis_setup(origin: f64, dir: f64, cell: i32) -> (i32, f64, f64) {
    let step = if dir > 0.0 { 1 } else { -1 };
    if dir == 0.0 {
        return (step, f64::INFINITY, f64::INFINITY);
    }
    let t_delta = (1.0 / dir).abs();
    let boundary = if dir > 0.0 { cell + 1 } else { cell } as f64;
    (step, t_delta, (boundary - origin) / dir)
}

/// Traverses the voxel grid along a ray.
///
/// # Arguments
/// * `origin` - Ray start in world space
/// * `direction` - Ray direction. Reach is measured in units of this vector,
///   so pass a unit vector for a reach in voxels.
/// * `get_block` - World lookup
///
/// # Returns
/// The first non-transparent voxel within [`MAX_REACH`], or `None`.
pub fn raycast_voxels<F>(origin: Point3<f64>, direction: Vector3<f64>, get_block: F) -> Option<RaycastHit>
where
    F: Fn(i32, i32, i32) -> BlockType,
{
    let mut x = origin.x.floor() as i32;
    let mut y = origin.y.floor() as i32;
    let mut z = origin.z.floor() as i32;

    let (step_x, t_delta_x, mut t_max_x) = axis_setup(origin.x, direction.x, x);
    let (step_y, t_delta_y, mut t_max_y) = axis_setup(origin.y, direction.y, y);
    let (step_z, t_delta_z, mut t_max_z) = axis_setup(origin.z, direction.z, z);

    let mut prev = VoxelCoord::new(x, y, z);
    let mut t = 0.0;

    while t < MAX_REACH {
        if get_block(x, y, z).is_solid() {
            return Some(RaycastHit {
                hit: VoxelCoord::new(x, y, z),
                face: prev,
            });
        }

        prev = VoxelCoord::new(x, y, z);

        if t_max_x < t_max_y {
            if t_max_x < t_max_z {
                t = t_max_x;
                x += step_x;
                t_max_x += t_delta_x;
            } else {
                t = t_max_z;
                z += step_z;
                t_max_z += t_delta_z;
            }
        } else if t_max_y < t_max_z {
            t = t_max_y;
            y += step_y;
            t_max_y += t_delta_y;
        } else {
            t = t_max_z;
            z += step_z;
            t_max_z += t_delta_z;
        }
    }

    None
}

/// Tracks the voxel under the crosshair and applies break/place actions.
#[derive(Debug, Default)]
pub struct BlockInteraction {
    current_hit: Option<RaycastHit>,
}

impl BlockInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// The target from the last [`update`](Self::update).
    pub fn current_hit(&self) -> Option<RaycastHit> {
        self.current_hit
    }

    /// Recomputes the target from the camera.
    pub fn update(&mut self, eye: Point3<f64>, direction: Vector3<f64>, chunks: &ChunkManager) {
        self.current_hit = raycast_voxels(eye, direction, |x, y, z| chunks.get_block(x, y, z));
    }

    /// Sets the targeted voxel to air.
    ///
    /// # Returns
    /// The edit, or `None` when nothing is targeted or the target's chunk is
    /// no longer loaded.
    pub fn break_block(&mut self, chunks: &mut ChunkManager) -> Option<VoxelEdit> {
        let RaycastHit { hit, .. } = self.current_hit?;
        if !chunks.set_block(hit.x, hit.y, hit.z, BlockType::Air) {
            debug!("Break target {:?} is not loaded", hit);
            return None;
        }
        Some(VoxelEdit {
            position: hit,
            block: BlockType::Air,
        })
    }

    /// Writes `block` into the face voxel of the current target.
    ///
    /// # Returns
    /// The edit, or `None` when nothing is targeted, the ray started inside
    /// the target (face equals hit), `block` is air, or the chunk is unloaded.
    pub fn place_block(&mut self, chunks: &mut ChunkManager, block: BlockType) -> Option<VoxelEdit> {
        let RaycastHit { hit, face } = self.current_hit?;
        if face == hit || block == BlockType::Air {
            return None;
        }
        if !chunks.set_block(face.x, face.y, face.z, block) {
            debug!("Place target {:?} is not loaded", face);
            return None;
        }
        Some(VoxelEdit { position: face, block })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground(_x: i32, y: i32, _z: i32) -> BlockType {
        if y <= 10 {
            BlockType::Stone
        } else {
            BlockType::Air
        }
    }

    #[test]
    fn looking_down_hits_the_ground_and_faces_upward() {
        let hit = raycast_voxels(Point3::new(0.5, 12.5, 0.5), Vector3::new(0.0, -1.0, 0.0), ground).unwrap();
        assert_eq!(hit.hit, VoxelCoord::new(0, 10, 0));
        assert_eq!(hit.face, VoxelCoord::new(0, 11, 0));
    }

    #[test]
    fn reach_is_limited() {
        let far = raycast_voxels(Point3::new(0.5, 30.5, 0.5), Vector3::new(0.0, -1.0, 0.0), ground);
        assert!(far.is_none());
        let sky = raycast_voxels(Point3::new(0.5, 12.5, 0.5), Vector3::new(0.0, 1.0, 0.0), ground);
        assert!(sky.is_none());
    }

    #[test]
    fn water_is_passed_through() {
        let lake = |_x: i32, y: i32, _z: i32| match y {
            ..=5 => BlockType::Sand,
            6..=8 => BlockType::Water,
            _ => BlockType::Air,
        };
        let hit = raycast_voxels(Point3::new(2.5, 9.5, 2.5), Vector3::new(0.0, -1.0, 0.0), lake).unwrap();
        assert_eq!(hit.hit, VoxelCoord::new(2, 5, 2));
        assert_eq!(hit.face, VoxelCoord::new(2, 6, 2));
    }

    #[test]
    fn horizontal_ray_reports_the_side_face() {
        let pillar = |x: i32, _y: i32, z: i32| {
            if x == 4 && z == 0 {
                BlockType::WoodLog
            } else {
                BlockType::Air
            }
        };
        let hit = raycast_voxels(Point3::new(0.5, 3.5, 0.5), Vector3::new(1.0, 0.0, 0.0), pillar).unwrap();
        assert_eq!(hit.hit, VoxelCoord::new(4, 3, 0));
        assert_eq!(hit.face, VoxelCoord::new(3, 3, 0));
    }

    #[test]
    fn ray_starting_inside_a_solid_voxel_cannot_place() {
        let hit = raycast_voxels(Point3::new(0.5, 5.5, 0.5), Vector3::new(0.0, 1.0, 0.0), ground).unwrap();
        assert_eq!(hit.hit, hit.face);

        let mut chunks = ChunkManager::new(0);
        let mut interaction = BlockInteraction {
            current_hit: Some(hit),
        };
        assert!(interaction.place_block(&mut chunks, BlockType::Dirt).is_none());
    }

    #[test]
    fn no_target_means_no_edit() {
        let mut chunks = ChunkManager::new(0);
        let mut interaction = BlockInteraction::new();
        interaction.update(Point3::new(0.5, 40.0, 0.5), Vector3::new(0.0, -1.0, 0.0), &chunks);
        assert!(interaction.current_hit().is_none());
        assert!(interaction.break_block(&mut chunks).is_none());
        assert!(interaction.place_block(&mut chunks, BlockType::Stone).is_none());
    }
}
