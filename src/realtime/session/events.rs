//! Messages crossing the session boundary.
//!
//! [`SessionEvent`]s flow in from the transport, [`SessionCommand`]s flow out
//! to it, and [`SessionNotification`]s flow out to the UI. None of them hold
//! platform handles; peers are addressed by id.

use std::collections::BTreeMap;

use serde_json::Value;
use web_time::Duration;

use crate::{
    engine_state::voxels::block::BlockType,
    realtime::{
        interpolation::InterpolatedPlayerState,
        protocol::{BlockPosition, PresenceEntry, RoomEvent, SignalingMessage},
        session_plan::{IceServer, RoomChannels, TransportConfig},
        voice::{MicrophonePermissionState, MicrophoneRequestResult, SpatialVoiceParams},
    },
};

/// Connection status reported to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Peer connection states as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// States after which the connection is torn down.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected | PeerConnectionState::Failed | PeerConnectionState::Closed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
}

/// Input to the session.
///
/// Startup results carry the epoch of the request that produced them so a
/// result arriving after `stop()` is ignored.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    IceServersFetched {
        epoch: u64,
        result: Result<Vec<IceServer>, String>,
    },
    ChannelsSubscribed {
        epoch: u64,
        result: Result<(), String>,
    },
    /// The full presence roster, as raw channel payloads.
    PresenceSynced(Vec<Value>),
    SignalReceived(Value),
    EventReceived(Value),
    /// The remote side created the data channel.
    RemoteDataChannel {
        peer_id: String,
    },
    DataChannelOpened {
        peer_id: String,
    },
    DataChannelClosed {
        peer_id: String,
    },
    DataChannelMessage {
        peer_id: String,
        payload: String,
    },
    /// An offer or answer was created and set as the local description.
    LocalDescriptionCreated {
        peer_id: String,
        kind: SdpKind,
        sdp: String,
    },
    LocalIceCandidate {
        peer_id: String,
        candidate: IceCandidate,
    },
    ConnectionStateChanged {
        peer_id: String,
        state: PeerConnectionState,
    },
    /// A remote audio stream arrived.
    RemoteTrack {
        peer_id: String,
    },
    MicrophoneResult {
        epoch: u64,
        result: MicrophoneRequestResult,
    },
    /// A transport operation failed after startup.
    TransportFailed {
        message: String,
    },
}

/// Work for the transport. Commands must be executed in order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    FetchIceServers {
        epoch: u64,
    },
    SubscribeChannels {
        epoch: u64,
        channels: RoomChannels,
    },
    TrackPresence(PresenceEntry),
    UnsubscribeChannels,
    CreatePeerConnection {
        peer_id: String,
        transport: TransportConfig,
    },
    CreateDataChannel {
        peer_id: String,
        label: &'static str,
        ordered: bool,
        max_retransmits: u16,
    },
    /// Create an offer, set it locally and report `LocalDescriptionCreated`.
    CreateOffer {
        peer_id: String,
    },
    /// Create an answer, set it locally and report `LocalDescriptionCreated`.
    CreateAnswer {
        peer_id: String,
    },
    SetRemoteDescription {
        peer_id: String,
        kind: SdpKind,
        sdp: String,
    },
    RollbackLocalDescription {
        peer_id: String,
    },
    AddIceCandidate {
        peer_id: String,
        candidate: IceCandidate,
    },
    SendSignal(SignalingMessage),
    BroadcastEvent(RoomEvent),
    SendData {
        peer_id: String,
        payload: String,
    },
    ClosePeer {
        peer_id: String,
    },
    OpenAudioContext,
    RequestMicrophone {
        epoch: u64,
    },
    /// Enables or disables the local microphone tracks.
    SetMicrophoneEnabled(bool),
    AttachLocalAudio {
        peer_id: String,
    },
    ReleaseMicrophone,
    CreateVoiceGraph {
        peer_id: String,
        gain: f64,
        max_distance: f64,
    },
    UpdateVoiceGraph {
        peer_id: String,
        params: SpatialVoiceParams,
    },
    DisposeVoiceGraph {
        peer_id: String,
    },
    CloseAudioContext,
    StartTimers {
        replication: Duration,
        interpolation: Duration,
    },
    StopTimers,
}

/// Output for the UI and the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionNotification {
    StatusChanged(SessionStatus),
    PeerCountChanged(usize),
    RemoteStates(BTreeMap<String, InterpolatedPlayerState>),
    /// A remote edit to write into the world.
    ApplyBlockEdit {
        position: BlockPosition,
        block: BlockType,
    },
    VoicePermissionChanged(MicrophonePermissionState),
    Error(String),
}
