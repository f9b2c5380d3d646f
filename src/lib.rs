//! # Voxel Sandbox
//!
//! The core of a small multiplayer voxel sandbox: a procedurally generated,
//! editable block world simulated on each client, and the peer-to-peer
//! session that keeps up to five clients in a room in sync.
//!
//! ## Key Modules
//!
//! * `engine_state` - Terrain generation, greedy meshing, chunk streaming,
//!   player physics, block interaction and the binary world snapshot
//! * `realtime` - Wire protocol, mesh topology, remote player interpolation,
//!   block-edit ordering, proximity voice and the session state machine
//! * `config` - Engine and session settings loadable from JSON
//! * `error` - Error types for every fallible boundary
//!
//! ## Architecture
//!
//! There is no server-side simulation. Each client runs its own
//! `EngineState` once per frame, with chunk generation and meshing on worker
//! threads. Clients exchange player poses over unreliable data channels and
//! block edits over a broadcast channel; the realtime session is a
//! synchronous state machine that a tokio runner connects to the actual
//! transport.

use std::env;

use log::{error, info, warn};
use web_time::Duration;

use config::EngineConfig;
use engine_state::{
    physics::InputState,
    snapshot::{compress_snapshot, decompress_snapshot},
    EngineState,
};

pub mod config;
pub mod engine_state;
pub mod error;
pub mod realtime;

/// Simulated frame length for the headless run.
const FRAME_TIME: Duration = Duration::from_millis(16);
/// Frames simulated before the demo edit, enough for the player to land.
const SETTLE_FRAMES: usize = 180;

/// Headless entry point.
///
/// Loads an engine config from the JSON file named by the first argument (or
/// uses the defaults), streams the world around the spawn point, lets the
/// player settle, breaks the block underfoot and round-trips the resulting
/// world snapshot through the compressed save format.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let config = match env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path).unwrap_or_else(|err| {
            warn!("Could not load config {}: {}, using defaults", path, err);
            EngineConfig::default()
        }),
        None => EngineConfig::default(),
    };

    let mut engine = EngineState::new(config.clone());
    let input = InputState::default();

    engine.update(FRAME_TIME, &input);
    engine.flush();
    for _ in 0..SETTLE_FRAMES {
        engine.update(FRAME_TIME, &input);
    }
    engine.flush();

    let player = *engine.player();
    info!(
        "Loaded {} chunks, player at ({:.2}, {:.2}, {:.2}), on ground: {}",
        engine.chunk_manager().loaded_chunks().len(),
        player.position.x,
        player.position.y,
        player.position.z,
        player.on_ground
    );

    engine.player_mut().pitch = -1.5;
    engine.flush();
    match engine.break_block() {
        Some(edit) => info!("Broke block at {:?}", edit.position),
        None => warn!("Nothing in reach to break"),
    }

    let snapshot = engine.snapshot(1);
    let bytes = match compress_snapshot(&snapshot) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Failed to save world: {}", err);
            return;
        }
    };
    info!(
        "Saved {} chunk diffs ({} entries) in {} compressed bytes",
        snapshot.chunks.len(),
        snapshot.entry_count(),
        bytes.len()
    );

    match decompress_snapshot(&bytes) {
        Ok(restored) => {
            let mut resumed = EngineState::new(config);
            resumed.resume(restored);
            resumed.update(FRAME_TIME, &input);
            resumed.flush();
            info!(
                "Resumed world with {} modified chunks, {} diffs pending",
                resumed.get_modified_chunk_diffs().len(),
                resumed.pending_diff_count()
            );
            resumed.dispose();
        }
        Err(err) => error!("Failed to load world: {}", err),
    }

    engine.dispose();
}
