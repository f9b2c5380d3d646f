//! # Realtime Module
//!
//! Everything a client needs to share a room with up to four other players
//! over a full peer mesh:
//!
//! * `protocol` - JSON wire messages and their validation
//! * `session_plan` - Roster to mesh topology, channel names, TURN gate
//! * `interpolation` - Delayed, clamped sampling of remote player poses
//! * `block_edits` - Per-actor edit ordering and the replay log
//! * `voice` - Proximity voice settings and attenuation
//! * `session` - The I/O-free session state machine
//! * `runner` - A tokio task driving the session against a transport

pub mod block_edits;
pub mod interpolation;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod session_plan;
pub mod voice;

pub use runner::{RealtimeTransport, SessionControl, SessionHandle, SessionRunner};
pub use session::{RealtimeSession, SessionCommand, SessionEvent, SessionNotification, SessionStatus};
