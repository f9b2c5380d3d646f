//! # Configuration
//!
//! Engine and session settings, loadable from JSON. Missing fields take the
//! defaults below, so a config file only needs to name what it changes.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::{engine_state::voxels::generation::Theme, error::ConfigError};

/// Lowest accepted player-state replication rate
pub const MIN_REPLICATION_HZ: u32 = 10;
/// Highest accepted player-state replication rate
pub const MAX_REPLICATION_HZ: u32 = 20;
/// Largest late-join replay a peer may request
pub const MAX_REPLAY_LIMIT: usize = 2000;

/// Rendering and streaming quality tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
}

/// What a quality preset resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    /// Chunk radius of the loaded window
    pub view_distance: i32,
    /// Upper bound for the render collaborator's device pixel ratio
    pub pixel_ratio_cap: f64,
}

impl QualityPreset {
    pub fn settings(self) -> QualitySettings {
        match self {
            QualityPreset::Low => QualitySettings {
                view_distance: 2,
                pixel_ratio_cap: 1.0,
            },
            QualityPreset::Medium => QualitySettings {
                view_distance: 3,
                pixel_ratio_cap: 1.5,
            },
            QualityPreset::High => QualitySettings {
                view_distance: 4,
                pixel_ratio_cap: 2.0,
            },
        }
    }
}

/// Host device characteristics used to pick a default preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub device_pixel_ratio: f64,
    pub hardware_concurrency: u32,
    pub is_touch: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    pub is_ipad: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            device_pixel_ratio: 1.0,
            hardware_concurrency: 4,
            is_touch: false,
            screen_width: 1920,
            screen_height: 1080,
            is_ipad: false,
        }
    }
}

/// Picks a quality preset for a device.
///
/// Tablets and low-core touch devices get `Low`; only high-DPI, wide,
/// many-core desktops get `High`.
pub fn recommend_quality_preset(profile: &DeviceProfile) -> QualityPreset {
    if profile.is_ipad || (profile.is_touch && profile.hardware_concurrency <= 4) {
        return QualityPreset::Low;
    }
    if !profile.is_touch
        && profile.hardware_concurrency >= 8
        && profile.device_pixel_ratio >= 1.5
        && profile.screen_width >= 1920
    {
        return QualityPreset::High;
    }
    QualityPreset::Medium
}

/// Rounds a replication rate and clamps it into the accepted range.
pub fn clamp_replication_hz(hz: f64) -> u32 {
    if !hz.is_finite() {
        return 15;
    }
    (hz.round().max(0.0) as u32).clamp(MIN_REPLICATION_HZ, MAX_REPLICATION_HZ)
}

fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// World and engine settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub seed: String,
    pub theme: Theme,
    pub quality: QualityPreset,
    /// Generation/meshing worker threads. Zero runs work inline.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            seed: "default".to_owned(),
            theme: Theme::Forest,
            quality: QualityPreset::Medium,
            worker_threads: 2,
        }
    }
}

impl EngineConfig {
    /// Loads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path)
    }

    /// View distance implied by the quality preset
    pub fn view_distance(&self) -> i32 {
        self.quality.settings().view_distance
    }
}

/// Realtime session settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub room_id: String,
    /// Left empty, the session picks a random id on creation.
    pub local_peer_id: String,
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    /// Player-state send rate. Rounded and clamped to 10..=20 on use.
    pub replication_hz: f64,
    /// How far behind real time remote players are rendered
    pub interpolation_delay_ms: f64,
    /// Frames kept per remote peer
    pub max_buffered_frames: usize,
    /// Block edits retained for world-sync replay
    pub edit_log_capacity: usize,
    /// Edits included in a late-join sync
    pub replay_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            room_id: String::new(),
            local_peer_id: String::new(),
            user_id: String::new(),
            display_name: String::new(),
            is_host: false,
            replication_hz: 15.0,
            interpolation_delay_ms: 100.0,
            max_buffered_frames: 20,
            edit_log_capacity: 5000,
            replay_limit: 500,
        }
    }
}

impl SessionConfig {
    /// Loads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path)
    }

    /// Effective replication rate
    pub fn replication_hz(&self) -> u32 {
        clamp_replication_hz(self.replication_hz)
    }

    /// Timer period for player-state replication
    pub fn replication_interval_ms(&self) -> u64 {
        (1000.0 / self.replication_hz() as f64).round() as u64
    }

    /// Effective late-join replay length
    pub fn replay_limit(&self) -> usize {
        self.replay_limit.clamp(1, MAX_REPLAY_LIMIT)
    }
}
