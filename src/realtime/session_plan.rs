//! # Session Plan
//!
//! Derives the peer mesh for a room from its roster alone. Every client
//! computes the same plan from the same inputs: channel names come from the
//! room id and the side that sends the offer is the lexicographically
//! smaller peer id, so no leader election or extra round-trip is needed.

use serde::{Deserialize, Serialize};

use crate::{
    error::SessionPlanError,
    realtime::protocol::{is_valid_peer_id, is_valid_room_id},
};

/// Largest room, local player included.
pub const MAX_PLAYERS_PER_ROOM: usize = 5;

/// STUN server used when the credential endpoint cannot be reached.
pub const FALLBACK_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// A fresh random peer id, unique per session.
pub fn generate_peer_id() -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric).take(16).collect();
    format!("peer-{}", suffix)
}

/// Names of the three pub/sub channels of a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomChannels {
    pub presence: String,
    pub signaling: String,
    pub events: String,
}

impl RoomChannels {
    pub fn for_room(room_id: &str) -> Self {
        RoomChannels {
            presence: format!("presence:room:{}", room_id),
            signaling: format!("signal:room:{}", room_id),
            events: format!("events:room:{}", room_id),
        }
    }
}

/// `urls` may be a single string or a list on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let urls: &[String] = match self {
            IceUrls::One(url) => std::slice::from_ref(url),
            IceUrls::Many(urls) => urls,
        };
        urls.iter().map(String::as_str)
    }
}

/// One entry returned by the ICE credential endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        IceServer {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }
}

/// Peer connection configuration handed to the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl TransportConfig {
    /// The configuration used when the credential fetch fails.
    pub fn fallback() -> Self {
        TransportConfig {
            ice_servers: vec![IceServer::new(FALLBACK_STUN_URL)],
        }
    }
}

fn has_scheme(url: &str, scheme: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with(&format!("{}:", scheme)) || lower.starts_with(&format!("{}s:", scheme))
}

/// Rejects transport configurations that cannot traverse restrictive NATs.
///
/// Every url must be `stun:`, `stuns:`, `turn:` or `turns:` and at least one
/// must be TURN.
pub fn validate_transport_config(config: &TransportConfig) -> Result<(), SessionPlanError> {
    if config.ice_servers.is_empty() {
        return Err(SessionPlanError::NoIceServers);
    }

    let mut has_turn = false;
    for url in config.ice_servers.iter().flat_map(|server| server.urls.iter()) {
        if has_scheme(url, "turn") {
            has_turn = true;
        } else if !has_scheme(url, "stun") {
            return Err(SessionPlanError::UnsupportedIceUrl(url.to_owned()));
        }
    }

    if has_turn {
        Ok(())
    } else {
        Err(SessionPlanError::TurnRequired)
    }
}

/// A remote peer in the mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPeer {
    pub peer_id: String,
    /// Whether the local side creates the data channel and sends the offer.
    pub initiator: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPlan {
    pub room_id: String,
    pub local_peer_id: String,
    pub channels: RoomChannels,
    /// Remote peers sorted by id.
    pub peers: Vec<PlannedPeer>,
    pub max_peers: usize,
}

impl SessionPlan {
    pub fn peer(&self, peer_id: &str) -> Option<&PlannedPeer> {
        self.peers.iter().find(|peer| peer.peer_id == peer_id)
    }
}

/// Builds the plan for `local_peer_id` given everyone currently in the room.
///
/// # Arguments
/// * `room_id` - Room identifier, trimmed before use
/// * `local_peer_id` - This client's peer id, trimmed before use
/// * `participant_peer_ids` - The roster. May contain duplicates and the local id
///
/// # Returns
/// The plan, or an error for invalid ids or an over-full room.
pub fn create_session_plan<S: AsRef<str>>(
    room_id: &str,
    local_peer_id: &str,
    participant_peer_ids: &[S],
) -> Result<SessionPlan, SessionPlanError> {
    let room_id = room_id.trim();
    if !is_valid_room_id(room_id) {
        return Err(SessionPlanError::InvalidRoomId);
    }
    let local_peer_id = local_peer_id.trim();
    if !is_valid_peer_id(local_peer_id) {
        return Err(SessionPlanError::InvalidPeerId(local_peer_id.to_owned()));
    }

    let mut remote_ids: Vec<&str> = Vec::with_capacity(participant_peer_ids.len());
    for id in participant_peer_ids {
        let id = id.as_ref().trim();
        if !is_valid_peer_id(id) {
            return Err(SessionPlanError::InvalidPeerId(id.to_owned()));
        }
        if id != local_peer_id {
            remote_ids.push(id);
        }
    }
    remote_ids.sort_unstable();
    remote_ids.dedup();

    let max_remote = MAX_PLAYERS_PER_ROOM - 1;
    if remote_ids.len() > max_remote {
        return Err(SessionPlanError::TooManyPeers {
            max: max_remote,
            got: remote_ids.len(),
        });
    }

    Ok(SessionPlan {
        room_id: room_id.to_owned(),
        local_peer_id: local_peer_id.to_owned(),
        channels: RoomChannels::for_room(room_id),
        peers: remote_ids
            .into_iter()
            .map(|peer_id| PlannedPeer {
                peer_id: peer_id.to_owned(),
                initiator: local_peer_id < peer_id,
            })
            .collect(),
        max_peers: MAX_PLAYERS_PER_ROOM,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn generated_peer_ids_are_valid_and_distinct() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert!(is_valid_peer_id(&a));
        assert_eq!(a.len(), 21);
        assert_ne!(a, b);
    }

    #[test]
    fn channel_names_derive_from_room() {
        let plan = create_session_plan(" lobby ", "b", &["a", "c"]).unwrap();
        assert_eq!(plan.channels.presence, "presence:room:lobby");
        assert_eq!(plan.channels.signaling, "signal:room:lobby");
        assert_eq!(plan.channels.events, "events:room:lobby");
    }

    #[test]
    fn initiator_is_the_smaller_id_on_both_sides() {
        let from_b = create_session_plan("r", "b", &["a", "b", "c"]).unwrap();
        let from_a = create_session_plan("r", "a", &["a", "b", "c"]).unwrap();
        assert_eq!(from_b.peer("a").map(|p| p.initiator), Some(false));
        assert_eq!(from_b.peer("c").map(|p| p.initiator), Some(true));
        assert_eq!(from_a.peer("b").map(|p| p.initiator), Some(true));
        assert!(from_b.peer("b").is_none());
    }

    #[test]
    fn duplicates_are_removed_and_peers_sorted() {
        let plan = create_session_plan("r", "m", &["z", "a", "z ", "a", "m"]).unwrap();
        let ids: Vec<&str> = plan.peers.iter().map(|p| p.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn room_is_capped_at_four_remote_peers() {
        assert!(create_session_plan("r", "p0", &["p1", "p2", "p3", "p4"]).is_ok());
        assert_matches!(
            create_session_plan("r", "p0", &["p1", "p2", "p3", "p4", "p5"]),
            Err(SessionPlanError::TooManyPeers { max: 4, got: 5 })
        );
    }

    #[test]
    fn invalid_ids_are_rejected() {
        assert_matches!(create_session_plan("bad room", "a", &["b"]), Err(SessionPlanError::InvalidRoomId));
        assert_matches!(create_session_plan("r", "", &["b"]), Err(SessionPlanError::InvalidPeerId(_)));
        assert_matches!(
            create_session_plan("r", "a", &["b c"]),
            Err(SessionPlanError::InvalidPeerId(ref id)) if id == "b c"
        );
    }

    #[test]
    fn transport_requires_turn() {
        assert_matches!(
            validate_transport_config(&TransportConfig::default()),
            Err(SessionPlanError::NoIceServers)
        );
        assert_matches!(
            validate_transport_config(&TransportConfig::fallback()),
            Err(SessionPlanError::TurnRequired)
        );
        let bad = TransportConfig {
            ice_servers: vec![IceServer::new("http://example.com")],
        };
        assert_matches!(validate_transport_config(&bad), Err(SessionPlanError::UnsupportedIceUrl(_)));

        let good = TransportConfig {
            ice_servers: vec![IceServer {
                urls: IceUrls::Many(vec!["stun:a.example".to_owned(), "TURNS:b.example:443".to_owned()]),
                username: Some("u".to_owned()),
                credential: Some("c".to_owned()),
            }],
        };
        assert!(validate_transport_config(&good).is_ok());
    }

    #[test]
    fn ice_urls_accept_string_or_list() {
        let servers: Vec<IceServer> = serde_json::from_str(
            r#"[{"urls":"turn:x.example"},{"urls":["stun:y.example"],"username":"u","credential":"p"}]"#,
        )
        .unwrap();
        assert_eq!(servers[0].urls, IceUrls::One("turn:x.example".to_owned()));
        assert_eq!(servers[1].urls.iter().collect::<Vec<_>>(), vec!["stun:y.example"]);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }
}
