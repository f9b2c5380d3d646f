//! # Realtime Protocol
//!
//! Wire shapes exchanged between peers and over the room's broadcast
//! channels, all JSON with camelCase keys and a `type` discriminant.
//!
//! Every inbound message is deserialized first and validated second. Parse
//! helpers return a [`ProtocolError`] for either failure; callers drop the
//! message and carry on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    engine_state::voxels::block::{BlockType, BlockTypeSize},
    error::ProtocolError,
};

/// Version stamped into every envelope.
pub const PROTOCOL_VERSION: u32 = 1;
/// Longest accepted room, peer or user id.
pub const MAX_ID_LEN: usize = 128;
/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 40;
/// Longest accepted snapshot storage path.
pub const MAX_STORAGE_PATH_LEN: usize = 1024;
/// Label of the per-peer unordered data channel.
pub const PLAYER_STATE_CHANNEL: &str = "player-state";

fn is_id(value: &str, allow_colon: bool) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || (allow_colon && b == b':'))
}

/// `[a-zA-Z0-9_-]{1,128}`
pub fn is_valid_room_id(room_id: &str) -> bool {
    is_id(room_id, false)
}

/// `[a-zA-Z0-9:_-]{1,128}`
pub fn is_valid_peer_id(peer_id: &str) -> bool {
    is_id(peer_id, true)
}

/// `[a-zA-Z0-9_-]{1,128}`
pub fn is_valid_user_id(user_id: &str) -> bool {
    is_id(user_id, false)
}

fn check_peer_id(peer_id: &str) -> Result<(), ProtocolError> {
    if is_valid_peer_id(peer_id) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPeerId)
    }
}

fn check_finite(value: f64, field: &str) -> Result<(), ProtocolError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ProtocolError::InvalidField(field.to_owned()))
    }
}

/// Fields shared by every room-scoped message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u32,
    pub room_id: String,
    pub sent_at_ms: u64,
}

impl Envelope {
    /// An envelope for a message sent now.
    pub fn new(room_id: impl Into<String>, sent_at_ms: u64) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            room_id: room_id.into(),
            sent_at_ms,
        }
    }

    /// Checks version, room id shape and that the message belongs to `room_id`.
    pub fn validate(&self, room_id: &str) -> Result<(), ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(self.version));
        }
        if !is_valid_room_id(&self.room_id) {
            return Err(ProtocolError::InvalidRoomId);
        }
        if self.room_id != room_id {
            return Err(ProtocolError::RoomMismatch);
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3 { x, y, z }
    }

    fn validate(&self, field: &str) -> Result<(), ProtocolError> {
        check_finite(self.x, field)?;
        check_finite(self.y, field)?;
        check_finite(self.z, field)
    }
}

impl From<cgmath::Point3<f64>> for Vector3 {
    fn from(p: cgmath::Point3<f64>) -> Self {
        Vector3::new(p.x, p.y, p.z)
    }
}

impl From<cgmath::Vector3<f64>> for Vector3 {
    fn from(v: cgmath::Vector3<f64>) -> Self {
        Vector3::new(v.x, v.y, v.z)
    }
}

/// Player orientation. `roll` is optional on the wire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct Rotation {
    pub yaw: f64,
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// What each client tracks on the presence channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub peer_id: String,
    pub user_id: String,
    pub display_name: String,
    pub joined_at_ms: u64,
    pub is_host: bool,
    pub voice_enabled: bool,
}

impl PresenceEntry {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_peer_id(&self.peer_id)?;
        if !is_valid_user_id(&self.user_id) {
            return Err(ProtocolError::InvalidUserId);
        }
        let name_len = self.display_name.chars().count();
        if name_len == 0 || name_len > MAX_DISPLAY_NAME_LEN {
            return Err(ProtocolError::InvalidField("displayName".to_owned()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// SDP/ICE relay payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalBody {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
}

/// A signaling broadcast. `to_peer_id` of `None` addresses everyone.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub from_peer_id: String,
    pub to_peer_id: Option<String>,
    #[serde(flatten)]
    pub body: SignalBody,
}

impl SignalingMessage {
    pub fn validate(&self, room_id: &str) -> Result<(), ProtocolError> {
        self.envelope.validate(room_id)?;
        check_peer_id(&self.from_peer_id)?;
        if let Some(to) = &self.to_peer_id {
            check_peer_id(to)?;
        }
        match &self.body {
            SignalBody::Offer { sdp } | SignalBody::Answer { sdp } if sdp.is_empty() => {
                Err(ProtocolError::InvalidField("sdp".to_owned()))
            }
            SignalBody::IceCandidate { candidate, .. } if candidate.is_empty() => {
                Err(ProtocolError::InvalidField("candidate".to_owned()))
            }
            _ => Ok(()),
        }
    }

    /// Whether this message is for `local_peer_id` and not from it.
    pub fn is_addressed_to(&self, local_peer_id: &str) -> bool {
        self.from_peer_id != local_peer_id
            && self.to_peer_id.as_deref().map_or(true, |to| to == local_peer_id)
    }
}

/// Parses and validates a signaling payload.
pub fn parse_signaling_message(payload: Value, room_id: &str) -> Result<SignalingMessage, ProtocolError> {
    let message: SignalingMessage = serde_json::from_value(payload)?;
    message.validate(room_id)?;
    Ok(message)
}

// ---------------------------------------------------------------------------
// Player state
// ---------------------------------------------------------------------------

/// One replicated pose of a player.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateFrame {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub peer_id: String,
    pub tick: u64,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Rotation,
}

impl PlayerStateFrame {
    pub fn validate(&self, room_id: &str) -> Result<(), ProtocolError> {
        self.envelope.validate(room_id)?;
        check_peer_id(&self.peer_id)?;
        self.position.validate("position")?;
        self.velocity.validate("velocity")?;
        check_finite(self.rotation.yaw, "rotation")?;
        check_finite(self.rotation.pitch, "rotation")?;
        check_finite(self.rotation.roll, "rotation")
    }
}

/// Messages carried on the peer data channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    PlayerState(PlayerStateFrame),
}

/// Serializes a frame for the data channel.
pub fn encode_player_state(frame: &PlayerStateFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&PeerMessage::PlayerState(frame.clone()))?)
}

/// Parses and validates a data-channel payload.
pub fn parse_player_state_frame(payload: &str, room_id: &str) -> Result<PlayerStateFrame, ProtocolError> {
    let PeerMessage::PlayerState(frame) = serde_json::from_str(payload)?;
    frame.validate(room_id)?;
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Room events
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BlockEditOperation {
    Place,
    Break,
}

/// Integer world voxel position.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPosition { x, y, z }
    }
}

/// One voxel edit by one actor.
///
/// `block_type` is required for `Place` and must be absent for `Break`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockEditEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub actor_peer_id: String,
    pub sequence: u32,
    pub operation: BlockEditOperation,
    pub position: BlockPosition,
    pub block_type: Option<BlockTypeSize>,
}

impl BlockEditEvent {
    /// Builds an edit from the block written at `position`. Writing air is a break.
    pub fn from_write(
        envelope: Envelope,
        actor_peer_id: impl Into<String>,
        sequence: u32,
        position: BlockPosition,
        block: BlockType,
    ) -> Self {
        let (operation, block_type) = if block == BlockType::Air {
            (BlockEditOperation::Break, None)
        } else {
            (BlockEditOperation::Place, Some(block.id()))
        };
        BlockEditEvent {
            envelope,
            actor_peer_id: actor_peer_id.into(),
            sequence,
            operation,
            position,
            block_type,
        }
    }

    /// The block this edit leaves at its position.
    pub fn resulting_block(&self) -> BlockType {
        self.block_type.and_then(BlockType::from_id).unwrap_or(BlockType::Air)
    }

    pub fn validate(&self, room_id: &str) -> Result<(), ProtocolError> {
        self.envelope.validate(room_id)?;
        check_peer_id(&self.actor_peer_id)?;
        match (self.operation, self.block_type) {
            (BlockEditOperation::Place, None) => Err(ProtocolError::InvalidBlockEdit(
                "blockType is required for place operations".to_owned(),
            )),
            (BlockEditOperation::Break, Some(_)) => Err(ProtocolError::InvalidBlockEdit(
                "blockType must be null for break operations".to_owned(),
            )),
            (BlockEditOperation::Place, Some(id)) => match BlockType::from_id(id) {
                Some(BlockType::Air) | None => Err(ProtocolError::InvalidBlockEdit(format!(
                    "blockType {} cannot be placed",
                    id
                ))),
                Some(_) => Ok(()),
            },
            (BlockEditOperation::Break, None) => Ok(()),
        }
    }
}

/// Full edit-log replay for peers that just appeared.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorldSync {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub edits: Vec<BlockEditEvent>,
}

/// A late joiner asking for the edits after its last known sequence.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LateJoinRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub requester_peer_id: String,
    pub last_known_sequence: Option<u32>,
}

/// Where a saved world snapshot can be fetched from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshotPointer {
    pub snapshot_id: String,
    pub storage_path: String,
    pub base_sequence: u32,
    pub created_at_ms: u64,
}

fn is_uuid(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

impl WorldSnapshotPointer {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !is_uuid(&self.snapshot_id) {
            return Err(ProtocolError::InvalidField("snapshotId".to_owned()));
        }
        if self.storage_path.is_empty() || self.storage_path.len() > MAX_STORAGE_PATH_LEN {
            return Err(ProtocolError::InvalidField("storagePath".to_owned()));
        }
        Ok(())
    }
}

/// Answer to a late-join request: a snapshot plus the edits made since.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LateJoinSync {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub recipient_peer_id: String,
    pub snapshot: WorldSnapshotPointer,
    pub replay_events: Vec<BlockEditEvent>,
}

/// Messages on the room's events channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RoomEvent {
    BlockEdit(BlockEditEvent),
    WorldSync(WorldSync),
    LateJoinRequest(LateJoinRequest),
    LateJoinSync(LateJoinSync),
}

impl RoomEvent {
    /// Validates the event and everything nested in it.
    ///
    /// Replayed edits keep the room of the outer message but are otherwise
    /// checked like live ones.
    pub fn validate(&self, room_id: &str) -> Result<(), ProtocolError> {
        match self {
            RoomEvent::BlockEdit(edit) => edit.validate(room_id),
            RoomEvent::WorldSync(sync) => {
                sync.envelope.validate(room_id)?;
                sync.edits.iter().try_for_each(|edit| edit.validate(room_id))
            }
            RoomEvent::LateJoinRequest(request) => {
                request.envelope.validate(room_id)?;
                check_peer_id(&request.requester_peer_id)
            }
            RoomEvent::LateJoinSync(sync) => {
                sync.envelope.validate(room_id)?;
                check_peer_id(&sync.recipient_peer_id)?;
                sync.snapshot.validate()?;
                sync.replay_events.iter().try_for_each(|edit| edit.validate(room_id))
            }
        }
    }
}

/// Parses and validates an events-channel payload.
pub fn parse_room_event(payload: Value, room_id: &str) -> Result<RoomEvent, ProtocolError> {
    let event: RoomEvent = serde_json::from_value(payload)?;
    event.validate(room_id)?;
    Ok(event)
}

/// Builds a late-join sync from the edit history.
///
/// Only edits newer than the snapshot's base sequence are replayed, oldest
/// first, keeping the newest `replay_limit` of them.
pub fn create_late_join_sync(
    room_id: &str,
    recipient_peer_id: &str,
    snapshot: WorldSnapshotPointer,
    now_ms: u64,
    history: &[BlockEditEvent],
    replay_limit: usize,
) -> Result<LateJoinSync, ProtocolError> {
    if !is_valid_room_id(room_id) {
        return Err(ProtocolError::InvalidRoomId);
    }
    check_peer_id(recipient_peer_id)?;
    if replay_limit == 0 || replay_limit > crate::config::MAX_REPLAY_LIMIT {
        return Err(ProtocolError::InvalidField("replayLimit".to_owned()));
    }
    snapshot.validate()?;

    let mut replay_events: Vec<BlockEditEvent> = history
        .iter()
        .filter(|edit| edit.sequence > snapshot.base_sequence)
        .cloned()
        .collect();
    replay_events.sort_by_key(|edit| edit.sequence);
    let skip = replay_events.len().saturating_sub(replay_limit);
    replay_events.drain(..skip);

    Ok(LateJoinSync {
        envelope: Envelope::new(room_id, now_ms),
        recipient_peer_id: recipient_peer_id.to_owned(),
        snapshot,
        replay_events,
    })
}
