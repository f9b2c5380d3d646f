//! # Player Controller
//!
//! Integrates one frame of input into the local player's state with
//! axis-aligned box collision against the voxel grid.
//!
//! ## Collision
//!
//! The player is a 0.6 x 1.8 x 0.6 box whose `position` is the centre of its
//! footprint at foot height. Each axis is integrated and tested on its own in
//! the order X, Z, Y. A colliding axis is rolled back and its velocity zeroed.
//! Landing snaps the feet onto the top face of the voxel below.
//!
//! After axis resolution a separate support probe looks for a solid voxel
//! directly under the footprint. A player resting exactly on a top face has
//! its feet on an integer boundary, so the collision box never overlaps the
//! floor and the Y pass alone cannot see it.

use std::f64::consts::FRAC_PI_2;

use cgmath::{Point3, Vector3};

use crate::engine_state::voxels::block::BlockType;

use super::input_state::InputState;

/// Radians of yaw/pitch per pixel of mouse movement
pub const MOUSE_SENSITIVITY: f64 = 0.002;
/// Radians of yaw/pitch per pixel of touch-drag movement
pub const TOUCH_SENSITIVITY: f64 = 0.004;
/// Horizontal speed in blocks per second
pub const WALK_SPEED: f64 = 4.3;
/// Horizontal speed while sprinting
pub const SPRINT_SPEED: f64 = 5.6;
/// Vertical acceleration in blocks per second squared
pub const GRAVITY: f64 = -32.0;
/// Upward velocity applied by a jump
pub const JUMP_VELOCITY: f64 = 10.0;
/// Footprint edge length
pub const PLAYER_WIDTH: f64 = 0.6;
/// Box height
pub const PLAYER_HEIGHT: f64 = 1.8;
/// Camera height above the feet
pub const EYE_HEIGHT: f64 = 1.6;
/// Where new players appear
pub const SPAWN_POSITION: [f64; 3] = [8.0, 63.0, 8.0];

const HALF_WIDTH: f64 = PLAYER_WIDTH / 2.0;
/// Safe limit for pitch to prevent gimbal flip
const SAFE_FRAC_PI_2: f64 = FRAC_PI_2 - 0.01;
/// How close the feet must be to a voxel boundary to count as resting on it
const GROUND_EPSILON: f64 = 1e-3;

/// The local player's simulation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    /// Centre of the footprint at foot height
    pub position: Point3<f64>,
    /// Blocks per second
    pub velocity: Vector3<f64>,
    /// Horizontal rotation in radians
    pub yaw: f64,
    /// Vertical rotation in radians, clamped short of straight up/down
    pub pitch: f64,
    /// Whether the player is standing on a solid voxel
    pub on_ground: bool,
}

impl PlayerState {
    /// Creates a resting player at the given position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        PlayerState {
            position: Point3::new(x, y, z),
            velocity: Vector3::new(0.0, 0.0, 0.0),
            yaw: 0.0,
            pitch: 0.0,
            on_ground: false,
        }
    }

    /// Creates a player at the default spawn point.
    pub fn spawn() -> Self {
        Self::new(SPAWN_POSITION[0], SPAWN_POSITION[1], SPAWN_POSITION[2])
    }

    /// Camera position.
    pub fn eye_position(&self) -> Point3<f64> {
        Point3::new(self.position.x, self.position.y + EYE_HEIGHT, self.position.z)
    }

    /// Unit view direction derived from yaw and pitch.
    pub fn look_direction(&self) -> Vector3<f64> {
        let (yaw_sin, yaw_cos) = self.yaw.sin_cos();
        let (pitch_sin, pitch_cos) = self.pitch.sin_cos();
        Vector3::new(-yaw_sin * pitch_cos, pitch_sin, -yaw_cos * pitch_cos)
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::spawn()
    }
}

/// Whether a voxel blocks movement. Air and water do not.
fn is_solid(block: BlockType) -> bool {
    block.is_solid()
}

/// Tests the player box with its minimum corner at `(min_x, min_y, min_z)`
/// against every voxel it overlaps.
fn box_collides<F>(min_x: f64, min_y: f64, min_z: f64, get_block: &F) -> bool
where
    F: Fn(i32, i32, i32) -> BlockType,
{
    let start_x = min_x.floor() as i32;
    let end_x = (min_x + PLAYER_WIDTH).floor() as i32;
    let start_y = min_y.floor() as i32;
    let end_y = (min_y + PLAYER_HEIGHT).floor() as i32;
    let start_z = min_z.floor() as i32;
    let end_z = (min_z + PLAYER_WIDTH).floor() as i32;

    for bx in start_x..=end_x {
        for by in start_y..=end_y {
            for bz in start_z..=end_z {
                if is_solid(get_block(bx, by, bz)) {
                    return true;
                }
            }
        }
    }
    false
}

/// Looks for a solid voxel directly beneath feet resting on a voxel boundary.
fn has_ground_support<F>(x: f64, y: f64, z: f64, get_block: &F) -> bool
where
    F: Fn(i32, i32, i32) -> BlockType,
{
    let boundary = y.round();
    if (y - boundary).abs() > GROUND_EPSILON {
        return false;
    }
    let below = boundary as i32 - 1;
    let start_x = (x - HALF_WIDTH).floor() as i32;
    let end_x = (x + HALF_WIDTH - GROUND_EPSILON).floor() as i32;
    let start_z = (z - HALF_WIDTH).floor() as i32;
    let end_z = (z + HALF_WIDTH - GROUND_EPSILON).floor() as i32;

    (start_x..=end_x).any(|bx| (start_z..=end_z).any(|bz| is_solid(get_block(bx, below, bz))))
}

/// Advances the player by one step.
///
/// # Arguments
/// * `state` - The state from the previous step
/// * `input` - This frame's input snapshot
/// * `dt` - Step length in seconds. Callers cap this on frame hitches.
/// * `get_block` - World lookup. Unloaded voxels should read as air.
///
/// # Returns
/// The new player state. `state` is left untouched.
pub fn update_player<F>(state: &PlayerState, input: &InputState, dt: f64, get_block: F) -> PlayerState
where
    F: Fn(i32, i32, i32) -> BlockType,
{
    let (px, py, pz) = (state.position.x, state.position.y, state.position.z);
    let mut yaw = state.yaw;
    let mut pitch = state.pitch;
    let mut vy = state.velocity.y;

    if input.pointer_locked {
        yaw -= input.mouse_delta_x * MOUSE_SENSITIVITY;
        pitch -= input.mouse_delta_y * MOUSE_SENSITIVITY;
    }
    if input.touch_look_delta_x != 0.0 || input.touch_look_delta_y != 0.0 {
        yaw -= input.touch_look_delta_x * TOUCH_SENSITIVITY;
        pitch -= input.touch_look_delta_y * TOUCH_SENSITIVITY;
    }
    pitch = pitch.clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2);

    let (move_x, move_z) = input.movement_vector();
    let (yaw_sin, yaw_cos) = yaw.sin_cos();
    let speed = if input.sprint { SPRINT_SPEED } else { WALK_SPEED };
    // Same rotation as look_direction, so forward walks where the camera faces.
    let mut vx = (move_x * yaw_cos + move_z * yaw_sin) * speed;
    let mut vz = (move_z * yaw_cos - move_x * yaw_sin) * speed;

    vy += GRAVITY * dt;
    if input.jump && state.on_ground {
        vy = JUMP_VELOCITY;
    }

    let mut new_x = px;
    let mut new_y = py;
    let mut new_z = pz;
    let mut on_ground = false;

    new_x += vx * dt;
    if box_collides(new_x - HALF_WIDTH, new_y, new_z - HALF_WIDTH, &get_block) {
        new_x = px;
        vx = 0.0;
    }

    new_z += vz * dt;
    if box_collides(new_x - HALF_WIDTH, new_y, new_z - HALF_WIDTH, &get_block) {
        new_z = pz;
        vz = 0.0;
    }

    new_y += vy * dt;
    if box_collides(new_x - HALF_WIDTH, new_y, new_z - HALF_WIDTH, &get_block) {
        if vy < 0.0 {
            on_ground = true;
            let snapped = new_y.floor() + 1.0;
            new_y = if box_collides(new_x - HALF_WIDTH, snapped, new_z - HALF_WIDTH, &get_block) {
                py
            } else {
                snapped
            };
        } else {
            new_y = py;
        }
        vy = 0.0;
    }

    if !on_ground && vy <= 0.0 && has_ground_support(new_x, new_y, new_z, &get_block) {
        on_ground = true;
        new_y = new_y.round();
        vy = 0.0;
    }

    PlayerState {
        position: Point3::new(new_x, new_y, new_z),
        velocity: Vector3::new(vx, vy, vz),
        yaw,
        pitch,
        on_ground,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 60.0;

    /// Flat stone floor whose top face is at y = 21.
    fn floor(_x: i32, y: i32, _z: i32) -> BlockType {
        if y <= 20 {
            BlockType::Stone
        } else {
            BlockType::Air
        }
    }

    #[test]
    fn standing_on_a_top_face_stays_grounded() {
        let mut state = PlayerState::new(8.5, 21.0, 8.5);
        state.on_ground = true;
        let input = InputState::default();
        for _ in 0..120 {
            state = update_player(&state, &input, DT, floor);
            assert!(state.on_ground);
            assert!((state.position.y - 21.0).abs() < 1e-9);
        }
    }

    #[test]
    fn falling_player_lands_on_the_voxel_boundary() {
        let mut state = PlayerState::new(8.5, 24.0, 8.5);
        let input = InputState::default();
        for _ in 0..120 {
            state = update_player(&state, &input, DT, floor);
        }
        assert!(state.on_ground);
        assert!((state.position.y - 21.0).abs() < 1e-9);
        assert_eq!(state.velocity.y, 0.0);
    }

    #[test]
    fn jump_requires_ground() {
        let mut state = PlayerState::new(8.5, 21.0, 8.5);
        state.on_ground = true;
        let input = InputState {
            jump: true,
            ..Default::default()
        };
        let airborne = update_player(&state, &input, DT, floor);
        assert!(!airborne.on_ground);
        assert!(airborne.position.y > 21.0);
        assert_eq!(airborne.velocity.y, JUMP_VELOCITY);

        let again = update_player(&airborne, &input, DT, floor);
        assert!(again.velocity.y < JUMP_VELOCITY);
    }

    #[test]
    fn walls_stop_horizontal_movement() {
        let wall = |x: i32, y: i32, _z: i32| {
            if y <= 20 || x >= 10 {
                BlockType::Stone
            } else {
                BlockType::Air
            }
        };
        let mut state = PlayerState::new(9.0, 21.0, 8.5);
        state.on_ground = true;
        let input = InputState {
            right: true,
            ..Default::default()
        };
        for _ in 0..60 {
            state = update_player(&state, &input, DT, wall);
        }
        assert!(state.position.x + HALF_WIDTH < 10.0);
        assert_eq!(state.velocity.x, 0.0);
        assert!(state.on_ground);
    }

    #[test]
    fn ceiling_cancels_upward_velocity() {
        let tunnel = |_x: i32, y: i32, _z: i32| {
            if y <= 20 || y >= 23 {
                BlockType::Stone
            } else {
                BlockType::Air
            }
        };
        let mut state = PlayerState::new(8.5, 21.0, 8.5);
        state.on_ground = true;
        let input = InputState {
            jump: true,
            ..Default::default()
        };
        for _ in 0..10 {
            state = update_player(&state, &input, DT, tunnel);
            assert!(state.position.y + PLAYER_HEIGHT < 23.0);
        }
    }

    #[test]
    fn water_does_not_block() {
        let pool = |_x: i32, y: i32, _z: i32| match y {
            ..=15 => BlockType::Stone,
            16..=20 => BlockType::Water,
            _ => BlockType::Air,
        };
        let mut state = PlayerState::new(8.5, 21.0, 8.5);
        let input = InputState::default();
        for _ in 0..60 {
            state = update_player(&state, &input, DT, pool);
        }
        assert!((state.position.y - 16.0).abs() < 1e-9);
        assert!(state.on_ground);
    }

    #[test]
    fn pitch_is_clamped_and_yaw_rotates_movement() {
        let state = PlayerState::new(0.0, 100.0, 0.0);
        let input = InputState {
            pointer_locked: true,
            mouse_delta_y: -10_000.0,
            ..Default::default()
        };
        let next = update_player(&state, &input, DT, |_, _, _| BlockType::Air);
        assert!(next.pitch < FRAC_PI_2);
        assert!((next.pitch - SAFE_FRAC_PI_2).abs() < 1e-12);

        let mut facing = PlayerState::new(0.0, 100.0, 0.0);
        facing.yaw = FRAC_PI_2;
        let input = InputState {
            forward: true,
            ..Default::default()
        };
        let moved = update_player(&facing, &input, DT, |_, _, _| BlockType::Air);
        assert!(moved.velocity.x < -4.0);
        assert!(moved.velocity.z.abs() < 1e-9);
        let look = facing.look_direction();
        assert!(look.x < -0.99);
    }
}
