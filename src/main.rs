//! # Voxel Sandbox Entry Point
//!
//! Runs the headless engine demo. Pass a path to an engine config JSON file
//! as the first argument to override the defaults.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- config.json
//! ```

fn main() {
    voxel_sandbox::run();
}
