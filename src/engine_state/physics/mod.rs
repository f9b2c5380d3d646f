//! # Physics Module
//!
//! Local player simulation: the input snapshot and the collision-resolving
//! controller that consumes it.

pub mod input_state;
pub mod player_controller;

pub use input_state::InputState;
pub use player_controller::{update_player, PlayerState};
