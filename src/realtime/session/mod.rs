//! # Realtime Session
//!
//! The per-room networking state machine:
//! `Idle -> Connecting -> Connected -> (Error | Idle)`.
//!
//! `RealtimeSession` performs no I/O. Transport results arrive through
//! [`RealtimeSession::handle_event`], timer work runs in
//! [`RealtimeSession::on_replication_tick`] and
//! [`RealtimeSession::on_interpolation_tick`], and every effect is queued as
//! a [`SessionCommand`] or a [`SessionNotification`] for the caller to drain.
//! The tokio runner in `realtime::runner` drives it against a real transport.
//!
//! ## Peer Lifecycle
//!
//! Presence is the only source of truth for who should be connected. Every
//! presence sync recomputes the session plan, opens connections to new peers
//! (offering when the plan says we initiate) and closes connections to
//! peers that left.
//!
//! ## Signaling
//!
//! Each peer tracks its offer/answer state. A remote offer arriving while our
//! own offer is outstanding rolls ours back. ICE candidates that arrive before
//! a remote description are queued and flushed once it is set. A
//! renegotiation requested mid-exchange runs once the peer is stable again.

pub mod events;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info, warn};
use web_time::Duration;

use crate::{
    config::SessionConfig,
    engine_state::{interaction::VoxelEdit, physics::PlayerState},
    error::ProtocolError,
    realtime::{
        block_edits::BlockEditLedger,
        interpolation::{InterpolatedPlayerState, PlayerInterpolationBuffer},
        protocol::{
            create_late_join_sync, encode_player_state, parse_player_state_frame, parse_room_event,
            parse_signaling_message, BlockEditEvent, BlockPosition, Envelope, LateJoinRequest, PlayerStateFrame,
            PresenceEntry, RoomEvent, Rotation, SignalBody, SignalingMessage, Vector3, WorldSnapshotPointer,
            WorldSync, PLAYER_STATE_CHANNEL,
        },
        session_plan::{
            create_session_plan, generate_peer_id, validate_transport_config, IceServer, RoomChannels,
            TransportConfig, MAX_PLAYERS_PER_ROOM,
        },
        voice::{
            compute_spatial_voice_params, reduce_voice_settings, MicrophonePermissionState,
            MicrophoneRequestResult, VoicePose, VoiceSettings, VoiceSettingsAction, VoiceSmoothing,
        },
    },
};

pub use events::{
    IceCandidate, PeerConnectionState, SdpKind, SessionCommand, SessionEvent, SessionNotification, SessionStatus,
};

/// Period of the remote-state sampling timer.
pub const INTERPOLATION_INTERVAL_MS: u64 = 50;
/// ICE candidates held per peer while waiting for a remote description.
pub const MAX_QUEUED_ICE_CANDIDATES: usize = 100;

/// Offer/answer state of one peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

struct PeerLink {
    initiator: bool,
    signaling: SignalingState,
    has_remote_description: bool,
    pending_candidates: VecDeque<IceCandidate>,
    data_channel_open: bool,
    needs_renegotiation: bool,
}

impl PeerLink {
    fn new(initiator: bool) -> Self {
        PeerLink {
            initiator,
            signaling: SignalingState::Stable,
            has_remote_description: false,
            pending_candidates: VecDeque::new(),
            data_channel_open: false,
            needs_renegotiation: false,
        }
    }
}

/// The local player's pose as replicated to peers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocalPlayerPose {
    pub position: Vector3,
    pub velocity: Vector3,
    pub yaw: f64,
    pub pitch: f64,
}

impl From<&PlayerState> for LocalPlayerPose {
    fn from(state: &PlayerState) -> Self {
        LocalPlayerPose {
            position: state.position.into(),
            velocity: state.velocity.into(),
            yaw: state.yaw,
            pitch: state.pitch,
        }
    }
}

pub struct RealtimeSession {
    config: SessionConfig,
    local_peer_id: String,
    channels: RoomChannels,
    status: SessionStatus,
    running: bool,
    /// Bumped on every start and stop.
    epoch: u64,
    transport: Option<TransportConfig>,
    subscribed: bool,
    peers: BTreeMap<String, PeerLink>,
    interpolation: PlayerInterpolationBuffer,
    remote_states: BTreeMap<String, InterpolatedPlayerState>,
    edits: BlockEditLedger,
    /// Latest saved world a host points late joiners at.
    world_snapshot: Option<WorldSnapshotPointer>,
    tick: u64,
    local_pose: LocalPlayerPose,
    joined_at_ms: u64,

    voice_settings: VoiceSettings,
    voice_permission: MicrophonePermissionState,
    voice_smoothing: VoiceSmoothing,
    microphone_pending: bool,
    microphone_active: bool,
    audio_context_open: bool,
    remote_streams: BTreeSet<String>,
    voice_graphs: BTreeSet<String>,

    commands: Vec<SessionCommand>,
    notifications: Vec<SessionNotification>,
}

impl RealtimeSession {
    /// Creates an idle session. An empty `local_peer_id` is replaced by a
    /// random one.
    pub fn new(mut config: SessionConfig) -> Self {
        config.room_id = config.room_id.trim().to_owned();
        config.local_peer_id = config.local_peer_id.trim().to_owned();
        if config.local_peer_id.is_empty() {
            config.local_peer_id = generate_peer_id();
        }

        RealtimeSession {
            local_peer_id: config.local_peer_id.clone(),
            channels: RoomChannels::for_room(&config.room_id),
            interpolation: PlayerInterpolationBuffer::new(config.interpolation_delay_ms, config.max_buffered_frames),
            edits: BlockEditLedger::new(config.edit_log_capacity),
            config,
            status: SessionStatus::Idle,
            running: false,
            epoch: 0,
            transport: None,
            subscribed: false,
            peers: BTreeMap::new(),
            remote_states: BTreeMap::new(),
            world_snapshot: None,
            tick: 0,
            local_pose: LocalPlayerPose::default(),
            joined_at_ms: 0,
            voice_settings: VoiceSettings::default(),
            voice_permission: MicrophonePermissionState::Prompt,
            voice_smoothing: VoiceSmoothing::default(),
            microphone_pending: false,
            microphone_active: false,
            audio_context_open: false,
            remote_streams: BTreeSet::new(),
            voice_graphs: BTreeSet::new(),
            commands: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    pub fn signaling_state(&self, peer_id: &str) -> Option<SignalingState> {
        self.peers.get(peer_id).map(|peer| peer.signaling)
    }

    pub fn queued_ice_candidates(&self, peer_id: &str) -> usize {
        self.peers.get(peer_id).map_or(0, |peer| peer.pending_candidates.len())
    }

    /// The most recent interpolated pose of every remote player.
    pub fn remote_states(&self) -> &BTreeMap<String, InterpolatedPlayerState> {
        &self.remote_states
    }

    pub fn edit_ledger(&self) -> &BlockEditLedger {
        &self.edits
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        self.voice_settings
    }

    pub fn voice_permission(&self) -> MicrophonePermissionState {
        self.voice_permission
    }

    pub fn is_voice_enabled(&self) -> bool {
        self.microphone_active
    }

    /// Takes the queued transport commands, oldest first.
    pub fn drain_commands(&mut self) -> Vec<SessionCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Takes the queued notifications, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<SessionNotification> {
        std::mem::take(&mut self.notifications)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begins connecting. Does nothing while already running.
    pub fn start(&mut self, now_ms: u64) {
        if self.running {
            return;
        }
        self.running = true;
        self.epoch += 1;
        self.joined_at_ms = now_ms;
        self.set_status(SessionStatus::Connecting);
        info!("Starting realtime session {} in room {}", self.local_peer_id, self.config.room_id);
        self.commands.push(SessionCommand::FetchIceServers { epoch: self.epoch });
    }

    /// Releases everything and returns to idle. Safe in any state.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.teardown();
        self.set_status(SessionStatus::Idle);
        info!("Realtime session stopped");
    }

    fn teardown(&mut self) {
        self.running = false;
        self.subscribed = false;
        self.epoch += 1;
        self.transport = None;
        self.commands.push(SessionCommand::StopTimers);

        let peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        for peer_id in peer_ids {
            self.disconnect_peer(&peer_id);
        }
        self.interpolation.clear();
        self.remote_states.clear();
        self.commands.push(SessionCommand::UnsubscribeChannels);

        for peer_id in std::mem::take(&mut self.voice_graphs) {
            self.commands.push(SessionCommand::DisposeVoiceGraph { peer_id });
        }
        self.remote_streams.clear();
        if self.microphone_active || self.microphone_pending {
            self.commands.push(SessionCommand::ReleaseMicrophone);
        }
        self.microphone_active = false;
        self.microphone_pending = false;
        if self.audio_context_open {
            self.commands.push(SessionCommand::CloseAudioContext);
            self.audio_context_open = false;
        }

        self.notifications.push(SessionNotification::PeerCountChanged(0));
    }

    /// Aborts startup: report, release, and park in `Error`.
    fn fail(&mut self, message: String) {
        warn!("Realtime session failed: {}", message);
        self.notifications.push(SessionNotification::Error(message));
        self.teardown();
        self.set_status(SessionStatus::Error);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!("Session status {:?} -> {:?}", self.status, status);
            self.status = status;
            self.notifications.push(SessionNotification::StatusChanged(status));
        }
    }

    fn is_stale(&self, epoch: u64) -> bool {
        !self.running || epoch != self.epoch
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Feeds one transport event into the state machine.
    pub fn handle_event(&mut self, event: SessionEvent, now_ms: u64) {
        match event {
            SessionEvent::IceServersFetched { epoch, result } => self.on_ice_servers(epoch, result),
            SessionEvent::ChannelsSubscribed { epoch, result } => self.on_channels_subscribed(epoch, result, now_ms),
            SessionEvent::PresenceSynced(entries) => self.on_presence_sync(entries, now_ms),
            SessionEvent::SignalReceived(payload) => self.on_signal(payload),
            SessionEvent::EventReceived(payload) => self.on_room_event(payload, now_ms),
            SessionEvent::RemoteDataChannel { peer_id } | SessionEvent::DataChannelClosed { peer_id } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.data_channel_open = false;
                }
            }
            SessionEvent::DataChannelOpened { peer_id } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.data_channel_open = true;
                }
            }
            SessionEvent::DataChannelMessage { peer_id, payload } => self.on_data_message(&peer_id, &payload),
            SessionEvent::LocalDescriptionCreated { peer_id, kind, sdp } => {
                self.on_local_description(&peer_id, kind, sdp, now_ms)
            }
            SessionEvent::LocalIceCandidate { peer_id, candidate } => {
                if self.peers.contains_key(&peer_id) {
                    self.send_signal(
                        Some(peer_id),
                        SignalBody::IceCandidate {
                            candidate: candidate.candidate,
                            sdp_mid: candidate.sdp_mid,
                            sdp_m_line_index: candidate.sdp_m_line_index,
                        },
                        now_ms,
                    );
                }
            }
            SessionEvent::ConnectionStateChanged { peer_id, state } => {
                if state.is_terminal() && self.peers.contains_key(&peer_id) {
                    info!("Peer {} connection {:?}", peer_id, state);
                    self.disconnect_peer(&peer_id);
                    self.notify_peer_count();
                }
            }
            SessionEvent::RemoteTrack { peer_id } => {
                if self.peers.contains_key(&peer_id) {
                    self.remote_streams.insert(peer_id.clone());
                    if self.microphone_active {
                        self.hydrate_voice_graph(&peer_id);
                    }
                }
            }
            SessionEvent::MicrophoneResult { epoch, result } => self.on_microphone_result(epoch, result),
            SessionEvent::TransportFailed { message } => {
                if self.running {
                    warn!("Transport failure: {}", message);
                    self.notifications.push(SessionNotification::Error(message));
                }
            }
        }
    }

    fn on_ice_servers(&mut self, epoch: u64, result: Result<Vec<IceServer>, String>) {
        if self.is_stale(epoch) {
            debug!("Ignoring stale ICE server result for epoch {}", epoch);
            return;
        }

        let transport = match result {
            Ok(ice_servers) if !ice_servers.is_empty() => TransportConfig { ice_servers },
            Ok(_) => {
                warn!("ICE server endpoint returned no servers, using fallback");
                TransportConfig::fallback()
            }
            Err(err) => {
                warn!("Failed to fetch ICE servers: {}", err);
                TransportConfig::fallback()
            }
        };

        if let Err(err) = validate_transport_config(&transport) {
            self.fail(err.to_string());
            return;
        }
        self.transport = Some(transport);
        self.commands.push(SessionCommand::SubscribeChannels {
            epoch,
            channels: self.channels.clone(),
        });
    }

    fn on_channels_subscribed(&mut self, epoch: u64, result: Result<(), String>, now_ms: u64) {
        if self.is_stale(epoch) {
            debug!("Ignoring stale subscription result for epoch {}", epoch);
            return;
        }
        if let Err(err) = result {
            self.fail(err);
            return;
        }

        self.subscribed = true;
        self.commands.push(SessionCommand::TrackPresence(self.presence_entry(now_ms)));
        self.commands.push(SessionCommand::StartTimers {
            replication: Duration::from_millis(self.config.replication_interval_ms()),
            interpolation: Duration::from_millis(INTERPOLATION_INTERVAL_MS),
        });
        self.set_status(SessionStatus::Connected);
    }

    fn presence_entry(&self, now_ms: u64) -> PresenceEntry {
        PresenceEntry {
            peer_id: self.local_peer_id.clone(),
            user_id: self.config.user_id.clone(),
            display_name: self.config.display_name.clone(),
            joined_at_ms: if self.joined_at_ms == 0 { now_ms } else { self.joined_at_ms },
            is_host: self.config.is_host,
            voice_enabled: self.microphone_active,
        }
    }

    fn on_presence_sync(&mut self, entries: Vec<serde_json::Value>, now_ms: u64) {
        if !self.running || !self.subscribed {
            return;
        }

        let roster: Vec<String> = entries
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<PresenceEntry>(value) {
                Ok(entry) if entry.validate().is_ok() => Some(entry.peer_id),
                Ok(_) | Err(_) => {
                    debug!("Dropping malformed presence entry");
                    None
                }
            })
            .filter(|peer_id| *peer_id != self.local_peer_id)
            .collect();

        let plan = match create_session_plan(&self.config.room_id, &self.local_peer_id, &roster) {
            Ok(plan) => plan,
            Err(err) => {
                warn!("Presence sync rejected: {}", err);
                self.notifications.push(SessionNotification::Error(err.to_string()));
                return;
            }
        };

        let mut joined = false;
        for planned in &plan.peers {
            if self.peers.contains_key(&planned.peer_id) {
                continue;
            }
            joined = true;
            info!("Peer {} joined (initiator: {})", planned.peer_id, planned.initiator);
            self.open_peer(&planned.peer_id, planned.initiator);
            if planned.initiator {
                self.commands.push(SessionCommand::CreateDataChannel {
                    peer_id: planned.peer_id.clone(),
                    label: PLAYER_STATE_CHANNEL,
                    ordered: false,
                    max_retransmits: 0,
                });
                self.negotiate(&planned.peer_id);
            }
        }

        let departed: Vec<String> = self
            .peers
            .keys()
            .filter(|peer_id| plan.peer(peer_id).is_none())
            .cloned()
            .collect();
        for peer_id in departed {
            info!("Peer {} left", peer_id);
            self.disconnect_peer(&peer_id);
        }

        if joined {
            if let Some(edits) = self.edits.replay() {
                debug!("Replaying {} edits for new peers", edits.len());
                self.commands.push(SessionCommand::BroadcastEvent(RoomEvent::WorldSync(WorldSync {
                    envelope: self.envelope(now_ms),
                    edits,
                })));
            }
        }

        self.notify_peer_count();
    }

    fn open_peer(&mut self, peer_id: &str, initiator: bool) {
        let transport = self.transport.clone().unwrap_or_else(TransportConfig::fallback);
        self.commands.push(SessionCommand::CreatePeerConnection {
            peer_id: peer_id.to_owned(),
            transport,
        });
        if self.microphone_active {
            self.commands.push(SessionCommand::AttachLocalAudio {
                peer_id: peer_id.to_owned(),
            });
        }
        self.peers.insert(peer_id.to_owned(), PeerLink::new(initiator));
    }

    /// Sends a fresh offer, or defers it until the current exchange settles.
    fn negotiate(&mut self, peer_id: &str) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        if peer.signaling != SignalingState::Stable {
            peer.needs_renegotiation = true;
            return;
        }
        peer.needs_renegotiation = false;
        peer.signaling = SignalingState::HaveLocalOffer;
        self.commands.push(SessionCommand::CreateOffer {
            peer_id: peer_id.to_owned(),
        });
    }

    fn disconnect_peer(&mut self, peer_id: &str) {
        if self.peers.remove(peer_id).is_none() {
            return;
        }
        self.commands.push(SessionCommand::ClosePeer {
            peer_id: peer_id.to_owned(),
        });
        self.interpolation.remove_peer(peer_id);
        self.remote_states.remove(peer_id);
        self.remote_streams.remove(peer_id);
        if self.voice_graphs.remove(peer_id) {
            self.commands.push(SessionCommand::DisposeVoiceGraph {
                peer_id: peer_id.to_owned(),
            });
        }
    }

    fn notify_peer_count(&mut self) {
        self.notifications
            .push(SessionNotification::PeerCountChanged(self.peers.len()));
    }

    fn envelope(&self, now_ms: u64) -> Envelope {
        Envelope::new(self.config.room_id.clone(), now_ms)
    }

    fn send_signal(&mut self, to_peer_id: Option<String>, body: SignalBody, now_ms: u64) {
        self.commands.push(SessionCommand::SendSignal(SignalingMessage {
            envelope: self.envelope(now_ms),
            from_peer_id: self.local_peer_id.clone(),
            to_peer_id,
            body,
        }));
    }

    fn on_signal(&mut self, payload: serde_json::Value) {
        if !self.running {
            return;
        }
        let message = match parse_signaling_message(payload, &self.config.room_id) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping signaling message: {}", err);
                return;
            }
        };
        if !message.is_addressed_to(&self.local_peer_id) {
            return;
        }

        let from = message.from_peer_id;
        match message.body {
            SignalBody::Offer { sdp } => self.on_remote_offer(from, sdp),
            SignalBody::Answer { sdp } => self.on_remote_answer(&from, sdp),
            SignalBody::IceCandidate {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => self.on_remote_candidate(
                &from,
                IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                },
            ),
        }
    }

    fn on_remote_offer(&mut self, from: String, sdp: String) {
        if !self.peers.contains_key(&from) {
            if self.peers.len() >= MAX_PLAYERS_PER_ROOM - 1 {
                warn!("Ignoring offer from {}: room is full", from);
                return;
            }
            self.open_peer(&from, false);
            self.notify_peer_count();
        }

        let Some(peer) = self.peers.get_mut(&from) else {
            return;
        };
        if peer.signaling == SignalingState::HaveLocalOffer {
            debug!("Offer glare with {}, rolling back local offer", from);
            self.commands.push(SessionCommand::RollbackLocalDescription { peer_id: from.clone() });
            peer.needs_renegotiation = true;
        }
        peer.signaling = SignalingState::HaveRemoteOffer;
        self.commands.push(SessionCommand::SetRemoteDescription {
            peer_id: from.clone(),
            kind: SdpKind::Offer,
            sdp,
        });
        self.flush_candidates(&from);
        if self.microphone_active {
            self.commands.push(SessionCommand::AttachLocalAudio { peer_id: from.clone() });
        }
        self.commands.push(SessionCommand::CreateAnswer { peer_id: from });
    }

    fn on_remote_answer(&mut self, from: &str, sdp: String) {
        let Some(peer) = self.peers.get_mut(from) else {
            return;
        };
        if peer.signaling != SignalingState::HaveLocalOffer {
            debug!("Dropping unexpected answer from {}", from);
            return;
        }
        peer.signaling = SignalingState::Stable;
        let renegotiate = peer.needs_renegotiation;
        self.commands.push(SessionCommand::SetRemoteDescription {
            peer_id: from.to_owned(),
            kind: SdpKind::Answer,
            sdp,
        });
        self.flush_candidates(from);
        if renegotiate {
            self.negotiate(from);
        }
    }

    fn on_remote_candidate(&mut self, from: &str, candidate: IceCandidate) {
        let Some(peer) = self.peers.get_mut(from) else {
            return;
        };
        if peer.has_remote_description {
            self.commands.push(SessionCommand::AddIceCandidate {
                peer_id: from.to_owned(),
                candidate,
            });
            return;
        }
        if peer.pending_candidates.len() == MAX_QUEUED_ICE_CANDIDATES {
            peer.pending_candidates.pop_front();
        }
        peer.pending_candidates.push_back(candidate);
    }

    /// Marks the remote description as set and releases queued candidates.
    fn flush_candidates(&mut self, peer_id: &str) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        peer.has_remote_description = true;
        for candidate in std::mem::take(&mut peer.pending_candidates) {
            self.commands.push(SessionCommand::AddIceCandidate {
                peer_id: peer_id.to_owned(),
                candidate,
            });
        }
    }

    fn on_local_description(&mut self, peer_id: &str, kind: SdpKind, sdp: String, now_ms: u64) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        let renegotiate = match kind {
            SdpKind::Offer => {
                // A remote offer may have replaced ours in the meantime.
                if peer.signaling != SignalingState::HaveLocalOffer {
                    debug!("Discarding superseded local offer for {}", peer_id);
                    return;
                }
                false
            }
            SdpKind::Answer => {
                peer.signaling = SignalingState::Stable;
                peer.needs_renegotiation && peer.initiator
            }
        };
        let body = match kind {
            SdpKind::Offer => SignalBody::Offer { sdp },
            SdpKind::Answer => SignalBody::Answer { sdp },
        };
        self.send_signal(Some(peer_id.to_owned()), body, now_ms);
        if renegotiate {
            self.negotiate(peer_id);
        }
    }

    fn on_data_message(&mut self, peer_id: &str, payload: &str) {
        if !self.peers.contains_key(peer_id) {
            return;
        }
        match parse_player_state_frame(payload, &self.config.room_id) {
            Ok(frame) if frame.peer_id == peer_id => self.interpolation.push(frame),
            Ok(frame) => debug!("Dropping frame for {} received from {}", frame.peer_id, peer_id),
            Err(err) => debug!("Dropping player-state payload from {}: {}", peer_id, err),
        }
    }

    fn on_room_event(&mut self, payload: serde_json::Value, now_ms: u64) {
        if !self.running {
            return;
        }
        let event = match parse_room_event(payload, &self.config.room_id) {
            Ok(event) => event,
            Err(err) => {
                debug!("Dropping room event: {}", err);
                return;
            }
        };

        match event {
            RoomEvent::BlockEdit(edit) => self.apply_remote_edit(edit),
            RoomEvent::WorldSync(sync) => sync.edits.into_iter().for_each(|edit| self.apply_remote_edit(edit)),
            RoomEvent::LateJoinRequest(request) => self.on_late_join_request(request, now_ms),
            RoomEvent::LateJoinSync(sync) => {
                if sync.recipient_peer_id == self.local_peer_id {
                    sync.replay_events.into_iter().for_each(|edit| self.apply_remote_edit(edit));
                }
            }
        }
    }

    /// Hosts answer with the published snapshot plus the edits the requester
    /// has not seen, capped at the configured replay limit.
    fn on_late_join_request(&mut self, request: LateJoinRequest, now_ms: u64) {
        if !self.config.is_host || request.requester_peer_id == self.local_peer_id {
            return;
        }
        let Some(snapshot) = self.world_snapshot.clone() else {
            debug!(
                "No world snapshot published, ignoring late-join request from {}",
                request.requester_peer_id
            );
            return;
        };

        let known = request.last_known_sequence.unwrap_or(0);
        let history: Vec<BlockEditEvent> = self.edits.log().filter(|edit| edit.sequence > known).cloned().collect();
        match create_late_join_sync(
            &self.config.room_id,
            &request.requester_peer_id,
            snapshot,
            now_ms,
            &history,
            self.config.replay_limit(),
        ) {
            Ok(sync) => {
                debug!(
                    "Sending late-join sync with {} edits to {}",
                    sync.replay_events.len(),
                    sync.recipient_peer_id
                );
                self.commands
                    .push(SessionCommand::BroadcastEvent(RoomEvent::LateJoinSync(sync)));
            }
            Err(err) => warn!("Could not build late-join sync for {}: {}", request.requester_peer_id, err),
        }
    }

    fn apply_remote_edit(&mut self, edit: BlockEditEvent) {
        if edit.actor_peer_id == self.local_peer_id {
            return;
        }
        let position = edit.position;
        let block = edit.resulting_block();
        if self.edits.accept(edit) {
            self.notifications
                .push(SessionNotification::ApplyBlockEdit { position, block });
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Sends the local pose to every peer with an open data channel.
    pub fn on_replication_tick(&mut self, now_ms: u64) {
        if !self.running || self.status != SessionStatus::Connected {
            return;
        }
        self.tick += 1;

        let frame = PlayerStateFrame {
            envelope: self.envelope(now_ms),
            peer_id: self.local_peer_id.clone(),
            tick: self.tick,
            position: self.local_pose.position,
            velocity: self.local_pose.velocity,
            rotation: Rotation {
                yaw: self.local_pose.yaw,
                pitch: self.local_pose.pitch,
                roll: 0.0,
            },
        };
        let payload = match encode_player_state(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode player state: {}", err);
                return;
            }
        };

        let open: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.data_channel_open)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        for peer_id in open {
            self.commands.push(SessionCommand::SendData {
                peer_id,
                payload: payload.clone(),
            });
        }
    }

    /// Samples remote players and updates their voice graphs.
    pub fn on_interpolation_tick(&mut self, now_ms: u64) {
        if !self.running {
            return;
        }
        self.remote_states = self.interpolation.sample_all(now_ms as f64);
        self.notifications
            .push(SessionNotification::RemoteStates(self.remote_states.clone()));

        if !self.audio_context_open {
            return;
        }
        let listener = VoicePose::from_orientation(self.local_pose.position, self.local_pose.yaw, self.local_pose.pitch);
        for peer_id in &self.voice_graphs {
            let Some(remote) = self.remote_states.get(peer_id) else {
                continue;
            };
            let speaker = VoicePose::from_orientation(remote.position, remote.rotation.yaw, remote.rotation.pitch);
            self.commands.push(SessionCommand::UpdateVoiceGraph {
                peer_id: peer_id.clone(),
                params: compute_spatial_voice_params(&listener, &speaker, &self.voice_settings, &self.voice_smoothing),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Local input
    // -----------------------------------------------------------------------

    pub fn update_local_player_state(&mut self, state: &PlayerState) {
        self.local_pose = LocalPlayerPose::from(state);
    }

    /// Records a local edit and broadcasts it while connected.
    ///
    /// # Returns
    /// The numbered event, whether or not it was sent.
    pub fn broadcast_block_edit(&mut self, edit: &VoxelEdit, now_ms: u64) -> BlockEditEvent {
        let position = BlockPosition::new(edit.position.x, edit.position.y, edit.position.z);
        let envelope = self.envelope(now_ms);
        let event = self
            .edits
            .record_local(envelope, &self.local_peer_id, position, edit.block);
        if self.running && self.subscribed {
            self.commands
                .push(SessionCommand::BroadcastEvent(RoomEvent::BlockEdit(event.clone())));
        }
        event
    }

    /// Records the saved world that late joiners are pointed at.
    pub fn publish_world_snapshot(&mut self, pointer: WorldSnapshotPointer) -> Result<(), ProtocolError> {
        pointer.validate()?;
        self.world_snapshot = Some(pointer);
        Ok(())
    }

    /// Asks the host for the edits made since `last_known_sequence`.
    pub fn request_late_join(&mut self, last_known_sequence: Option<u32>, now_ms: u64) {
        if !self.running || !self.subscribed {
            return;
        }
        self.commands
            .push(SessionCommand::BroadcastEvent(RoomEvent::LateJoinRequest(LateJoinRequest {
                envelope: self.envelope(now_ms),
                requester_peer_id: self.local_peer_id.clone(),
                last_known_sequence,
            })));
    }

    // -----------------------------------------------------------------------
    // Voice
    // -----------------------------------------------------------------------

    /// Opens the audio context and asks for the microphone.
    pub fn enable_voice(&mut self) {
        if !self.running || self.microphone_active || self.microphone_pending {
            return;
        }
        if !self.audio_context_open {
            self.audio_context_open = true;
            self.commands.push(SessionCommand::OpenAudioContext);
        }
        self.microphone_pending = true;
        self.commands.push(SessionCommand::RequestMicrophone { epoch: self.epoch });
    }

    /// Stops sending the microphone. Remote voices keep playing.
    pub fn disable_voice(&mut self) {
        if !self.microphone_active {
            return;
        }
        self.microphone_active = false;
        self.commands.push(SessionCommand::ReleaseMicrophone);
    }

    pub fn set_voice_settings(&mut self, settings: VoiceSettings) {
        self.voice_settings = settings.normalized();
        if self.microphone_active {
            self.commands
                .push(SessionCommand::SetMicrophoneEnabled(!self.voice_settings.muted));
        }
    }

    pub fn apply_voice_action(&mut self, action: VoiceSettingsAction) {
        let next = reduce_voice_settings(self.voice_settings, action);
        self.set_voice_settings(next);
    }

    fn on_microphone_result(&mut self, epoch: u64, result: MicrophoneRequestResult) {
        if self.is_stale(epoch) {
            if result.is_granted() {
                self.commands.push(SessionCommand::ReleaseMicrophone);
            }
            return;
        }
        self.microphone_pending = false;
        self.voice_permission = result.permission();
        self.notifications
            .push(SessionNotification::VoicePermissionChanged(self.voice_permission));

        if let MicrophoneRequestResult::Failed { reason, code, .. } = result {
            warn!("Microphone unavailable ({:?}): {}", code, reason);
            self.notifications.push(SessionNotification::Error(reason));
            return;
        }

        self.microphone_active = true;
        self.commands
            .push(SessionCommand::SetMicrophoneEnabled(!self.voice_settings.muted));

        let peers: Vec<(String, bool)> = self
            .peers
            .iter()
            .map(|(peer_id, peer)| (peer_id.clone(), peer.initiator))
            .collect();
        for (peer_id, initiator) in peers {
            self.commands.push(SessionCommand::AttachLocalAudio {
                peer_id: peer_id.clone(),
            });
            if initiator {
                self.negotiate(&peer_id);
            }
        }

        let streams: Vec<String> = self.remote_streams.iter().cloned().collect();
        for peer_id in streams {
            self.hydrate_voice_graph(&peer_id);
        }
    }

    fn hydrate_voice_graph(&mut self, peer_id: &str) {
        if !self.audio_context_open || !self.voice_graphs.insert(peer_id.to_owned()) {
            return;
        }
        let gain = if self.voice_settings.muted {
            0.0
        } else {
            self.voice_settings.volume
        };
        self.commands.push(SessionCommand::CreateVoiceGraph {
            peer_id: peer_id.to_owned(),
            gain,
            max_distance: self.voice_settings.proximity_radius,
        });
    }
}
