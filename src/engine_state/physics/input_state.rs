//! # Input State
//!
//! This module defines the per-frame input snapshot consumed by the player
//! controller. The host layer (keyboard, pointer lock, touch joystick) fills
//! an `InputState` once per frame; the controller never reads devices itself.

/// Joystick deflection below this magnitude is ignored.
pub const JOYSTICK_DEAD_ZONE: f64 = 0.2;

/// A snapshot of everything the player controller reads in one step.
///
/// Mouse and touch-look deltas are accumulated by the host between frames and
/// should be reset after each step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Move forward key held
    pub forward: bool,
    /// Move backward key held
    pub backward: bool,
    /// Strafe left key held
    pub left: bool,
    /// Strafe right key held
    pub right: bool,
    /// Jump key held
    pub jump: bool,
    /// Sprint modifier held
    pub sprint: bool,
    /// Whether the pointer is captured. Mouse deltas are ignored otherwise.
    pub pointer_locked: bool,
    /// Mouse movement since the last step, in pixels
    pub mouse_delta_x: f64,
    /// Mouse movement since the last step, in pixels
    pub mouse_delta_y: f64,
    /// Virtual joystick deflection, -1..1. Positive Y is forward.
    pub touch_joystick_x: f64,
    /// Virtual joystick deflection, -1..1. Positive Y is forward.
    pub touch_joystick_y: f64,
    /// Touch-drag look movement since the last step, in pixels
    pub touch_look_delta_x: f64,
    /// Touch-drag look movement since the last step, in pixels
    pub touch_look_delta_y: f64,
}

impl InputState {
    /// Determines the unit movement direction in player space.
    ///
    /// # Returns
    /// `(move_x, move_z)` where negative Z is forward. Diagonals are
    /// normalized, and `(0, 0)` is returned when nothing is pressed.
    pub fn movement_vector(&self) -> (f64, f64) {
        let mut move_x: f64 = 0.0;
        let mut move_z: f64 = 0.0;
        if self.forward || self.touch_joystick_y > JOYSTICK_DEAD_ZONE {
            move_z -= 1.0;
        }
        if self.backward || self.touch_joystick_y < -JOYSTICK_DEAD_ZONE {
            move_z += 1.0;
        }
        if self.left || self.touch_joystick_x < -JOYSTICK_DEAD_ZONE {
            move_x -= 1.0;
        }
        if self.right || self.touch_joystick_x > JOYSTICK_DEAD_ZONE {
            move_x += 1.0;
        }

        let magnitude = (move_x * move_x + move_z * move_z).sqrt();
        if magnitude > 0.0 {
            (move_x / magnitude, move_z / magnitude)
        } else {
            (0.0, 0.0)
        }
    }

    /// Determines if any look input arrived this step
    pub fn has_look_input(&self) -> bool {
        (self.pointer_locked && (self.mouse_delta_x != 0.0 || self.mouse_delta_y != 0.0))
            || self.touch_look_delta_x != 0.0
            || self.touch_look_delta_y != 0.0
    }

    /// Clears the accumulated deltas after a step has consumed them
    pub fn reset_deltas(&mut self) {
        self.mouse_delta_x = 0.0;
        self.mouse_delta_y = 0.0;
        self.touch_look_delta_x = 0.0;
        self.touch_look_delta_y = 0.0;
    }
}
