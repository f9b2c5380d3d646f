//! # Proximity Voice
//!
//! Pure parts of the voice pipeline: user settings and their reducer, the
//! distance attenuation applied to each remote voice, parameter smoothing,
//! and classification of microphone failures. The audio graph itself lives
//! in the transport; the session sends it [`SpatialVoiceParams`].

use serde::{Deserialize, Serialize};

use super::protocol::Vector3;

pub const VOICE_VOLUME_MIN: f64 = 0.0;
pub const VOICE_VOLUME_MAX: f64 = 1.0;
pub const VOICE_DEFAULT_VOLUME: f64 = 1.0;
pub const VOICE_DEFAULT_PROXIMITY_RADIUS: f64 = 60.0;
pub const VOICE_MIN_PROXIMITY_RADIUS: f64 = 5.0;
pub const VOICE_MAX_PROXIMITY_RADIUS: f64 = 100.0;
/// Attenuation never drops a remote voice below this fraction.
pub const VOICE_MIN_SPATIAL_GAIN: f64 = 0.25;
/// Distance inside which voices play at full volume.
pub const VOICE_REF_DISTANCE: f64 = 3.0;
pub const VOICE_ROLLOFF_FACTOR: f64 = 0.7;

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    // NaN falls to the minimum.
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

pub fn clamp_voice_volume(volume: f64) -> f64 {
    clamp(volume, VOICE_VOLUME_MIN, VOICE_VOLUME_MAX)
}

pub fn clamp_voice_proximity_radius(radius: f64) -> f64 {
    clamp(radius, VOICE_MIN_PROXIMITY_RADIUS, VOICE_MAX_PROXIMITY_RADIUS)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceSettings {
    pub muted: bool,
    pub volume: f64,
    pub proximity_radius: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        VoiceSettings {
            muted: false,
            volume: VOICE_DEFAULT_VOLUME,
            proximity_radius: VOICE_DEFAULT_PROXIMITY_RADIUS,
        }
    }
}

impl VoiceSettings {
    /// Clamps volume and radius into range.
    pub fn normalized(self) -> Self {
        VoiceSettings {
            muted: self.muted,
            volume: clamp_voice_volume(self.volume),
            proximity_radius: clamp_voice_proximity_radius(self.proximity_radius),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VoiceSettingsAction {
    ToggleMute,
    SetMuted {
        muted: bool,
    },
    SetVolume {
        volume: f64,
    },
    #[serde(rename_all = "camelCase")]
    SetProximityRadius {
        proximity_radius: f64,
    },
}

pub fn reduce_voice_settings(state: VoiceSettings, action: VoiceSettingsAction) -> VoiceSettings {
    match action {
        VoiceSettingsAction::ToggleMute => VoiceSettings {
            muted: !state.muted,
            ..state
        },
        VoiceSettingsAction::SetMuted { muted } => VoiceSettings { muted, ..state },
        VoiceSettingsAction::SetVolume { volume } => VoiceSettings {
            volume: clamp_voice_volume(volume),
            ..state
        },
        VoiceSettingsAction::SetProximityRadius { proximity_radius } => VoiceSettings {
            proximity_radius: clamp_voice_proximity_radius(proximity_radius),
            ..state
        },
    }
}

/// Gain applied to a remote voice heard from `distance` away.
///
/// Inverse rolloff between the reference distance and the proximity radius,
/// floored at [`VOICE_MIN_SPATIAL_GAIN`], scaled by volume. Zero when muted.
pub fn spatial_gain(distance: f64, settings: &VoiceSettings) -> f64 {
    if settings.muted {
        return 0.0;
    }
    let max_distance = settings.proximity_radius.max(1.0);
    let clamped = clamp(distance, VOICE_REF_DISTANCE, max_distance.max(VOICE_REF_DISTANCE));
    let distance_gain =
        VOICE_REF_DISTANCE / (VOICE_REF_DISTANCE + VOICE_ROLLOFF_FACTOR * (clamped - VOICE_REF_DISTANCE));
    clamp_voice_volume(settings.volume) * distance_gain.max(VOICE_MIN_SPATIAL_GAIN)
}

/// Exponential smoothing factors for audio parameter updates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceSmoothing {
    pub position_alpha: f64,
    pub gain_alpha: f64,
}

impl Default for VoiceSmoothing {
    fn default() -> Self {
        VoiceSmoothing {
            position_alpha: 0.35,
            gain_alpha: 0.2,
        }
    }
}

/// Time constant for approaching a target value with smoothing `alpha`.
///
/// # Returns
/// `None` when `alpha` is zero or less, meaning the value is set directly.
pub fn smoothing_time_constant(alpha: f64) -> Option<f64> {
    let alpha = clamp(alpha, 0.0, 1.0);
    if alpha <= 0.0 {
        None
    } else {
        Some((1.0 - alpha).max(0.0001))
    }
}

/// Where a listener or speaker is and which way it faces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoicePose {
    pub position: Vector3,
    pub forward: Option<Vector3>,
}

impl VoicePose {
    /// A pose facing along yaw and pitch.
    pub fn from_orientation(position: Vector3, yaw: f64, pitch: f64) -> Self {
        VoicePose {
            position,
            forward: Some(Vector3::new(
                -yaw.sin() * pitch.cos(),
                pitch.sin(),
                -yaw.cos() * pitch.cos(),
            )),
        }
    }
}

/// Panner and gain targets for one remote voice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialVoiceParams {
    /// Speaker position relative to the listener.
    pub position: Vector3,
    pub orientation: Vector3,
    pub max_distance: f64,
    pub gain: f64,
    pub position_time_constant: Option<f64>,
    pub gain_time_constant: Option<f64>,
}

/// Computes the audio graph update for a remote speaker.
pub fn compute_spatial_voice_params(
    local: &VoicePose,
    remote: &VoicePose,
    settings: &VoiceSettings,
    smoothing: &VoiceSmoothing,
) -> SpatialVoiceParams {
    let dx = remote.position.x - local.position.x;
    let dy = remote.position.y - local.position.y;
    let dz = remote.position.z - local.position.z;
    let distance = (dx * dx + dy * dy + dz * dz).sqrt();

    SpatialVoiceParams {
        position: Vector3::new(dx, dy, dz),
        orientation: remote.forward.unwrap_or(Vector3::new(0.0, 0.0, 1.0)),
        max_distance: settings.proximity_radius.max(1.0),
        gain: spatial_gain(distance, settings),
        position_time_constant: smoothing_time_constant(smoothing.position_alpha),
        gain_time_constant: smoothing_time_constant(smoothing.gain_alpha),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MicrophonePermissionState {
    Granted,
    Denied,
    Prompt,
    Unsupported,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MicrophoneErrorCode {
    Unsupported,
    PermissionDenied,
    DeviceUnavailable,
    Unknown,
}

impl MicrophoneErrorCode {
    /// Classifies a platform capture error by its name.
    pub fn from_error_name(name: &str) -> Self {
        match name {
            "NotAllowedError" | "SecurityError" => MicrophoneErrorCode::PermissionDenied,
            "NotFoundError" | "NotReadableError" | "OverconstrainedError" => {
                MicrophoneErrorCode::DeviceUnavailable
            }
            "NotSupportedError" => MicrophoneErrorCode::Unsupported,
            _ => MicrophoneErrorCode::Unknown,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            MicrophoneErrorCode::Unsupported => "Microphone capture is not supported",
            MicrophoneErrorCode::PermissionDenied => "User denied microphone permission",
            MicrophoneErrorCode::DeviceUnavailable => "No usable microphone device",
            MicrophoneErrorCode::Unknown => "Failed to capture microphone",
        }
    }
}

/// Outcome of asking the platform for a microphone stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MicrophoneRequestResult {
    /// The transport holds the stream.
    Granted { permission: MicrophonePermissionState },
    Failed {
        permission: MicrophonePermissionState,
        code: MicrophoneErrorCode,
        reason: String,
    },
}

impl MicrophoneRequestResult {
    /// The capture API does not exist on this platform.
    pub fn unsupported() -> Self {
        let code = MicrophoneErrorCode::Unsupported;
        MicrophoneRequestResult::Failed {
            permission: MicrophonePermissionState::Unsupported,
            code,
            reason: code.reason().to_owned(),
        }
    }

    /// A capture attempt failed with a named platform error.
    ///
    /// `permission` is the state queried after the failure; `Unsupported`
    /// there only means the query itself is unavailable and reads as `Prompt`.
    pub fn from_error(name: &str, permission: MicrophonePermissionState) -> Self {
        let code = MicrophoneErrorCode::from_error_name(name);
        let permission = if permission == MicrophonePermissionState::Unsupported {
            MicrophonePermissionState::Prompt
        } else {
            permission
        };
        MicrophoneRequestResult::Failed {
            permission,
            code,
            reason: code.reason().to_owned(),
        }
    }

    pub fn permission(&self) -> MicrophonePermissionState {
        match self {
            MicrophoneRequestResult::Granted { permission } | MicrophoneRequestResult::Failed { permission, .. } => {
                *permission
            }
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, MicrophoneRequestResult::Granted { .. })
    }
}
