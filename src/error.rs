//! Error types for the fallible boundaries of the crate: snapshot decoding,
//! protocol parsing, session planning and configuration loading.

use std::error::Error;
use std::fmt;
use std::io;

/// Failure to decode or encode a world snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// The first four bytes are not the snapshot magic
    BadMagic(u32),
    /// The version byte is not the one this codec reads
    UnsupportedVersion(u8),
    /// The theme byte does not name a known theme
    UnknownTheme(u8),
    /// The buffer ended inside a field
    Truncated,
    /// The seed bytes are not valid UTF-8
    InvalidSeed,
    /// A diff entry addresses a voxel outside the chunk or an unknown block
    InvalidEntry,
    /// Bytes remained after the last chunk record
    TrailingBytes(usize),
    /// A length does not fit its 32-bit field
    TooLarge(&'static str),
    /// Gzip wrapping or unwrapping failed
    Compression(io::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::BadMagic(magic) => write!(f, "Invalid snapshot magic: {:#010x}", magic),
            SnapshotError::UnsupportedVersion(version) => {
                write!(f, "Unsupported snapshot version: {}", version)
            }
            SnapshotError::UnknownTheme(index) => write!(f, "Unknown theme index: {}", index),
            SnapshotError::Truncated => write!(f, "Snapshot buffer is truncated"),
            SnapshotError::InvalidSeed => write!(f, "Snapshot seed is not valid UTF-8"),
            SnapshotError::InvalidEntry => write!(f, "Snapshot contains an invalid diff entry"),
            SnapshotError::TrailingBytes(count) => {
                write!(f, "Snapshot has {} unexpected trailing bytes", count)
            }
            SnapshotError::TooLarge(field) => write!(f, "Snapshot field too large: {}", field),
            SnapshotError::Compression(err) => write!(f, "Snapshot compression error: {}", err),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SnapshotError::Compression(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            SnapshotError::Truncated
        } else {
            SnapshotError::Compression(err)
        }
    }
}

/// A realtime message that failed to parse or validate.
#[derive(Debug)]
pub enum ProtocolError {
    InvalidRoomId,
    InvalidPeerId,
    InvalidUserId,
    /// The envelope carries a protocol version other than ours
    VersionMismatch(u32),
    /// The envelope names a different room
    RoomMismatch,
    /// A field is out of range or not finite
    InvalidField(String),
    /// A block edit breaks the place/break block-type rule
    InvalidBlockEdit(String),
    Json(serde_json::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidRoomId => write!(f, "Invalid room id"),
            ProtocolError::InvalidPeerId => write!(f, "Invalid peer id"),
            ProtocolError::InvalidUserId => write!(f, "Invalid user id"),
            ProtocolError::VersionMismatch(version) => {
                write!(f, "Unsupported protocol version: {}", version)
            }
            ProtocolError::RoomMismatch => write!(f, "Message addressed to another room"),
            ProtocolError::InvalidField(field) => write!(f, "Invalid field: {}", field),
            ProtocolError::InvalidBlockEdit(msg) => write!(f, "Invalid block edit: {}", msg),
            ProtocolError::Json(err) => write!(f, "Malformed message: {}", err),
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Json(err)
    }
}

/// A session plan or transport configuration that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPlanError {
    InvalidRoomId,
    InvalidPeerId(String),
    /// More remote participants than the mesh allows
    TooManyPeers { max: usize, got: usize },
    NoIceServers,
    UnsupportedIceUrl(String),
    /// Only STUN servers were configured
    TurnRequired,
}

impl fmt::Display for SessionPlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPlanError::InvalidRoomId => write!(f, "Invalid room id"),
            SessionPlanError::InvalidPeerId(id) => write!(f, "Invalid peer id: {}", id),
            SessionPlanError::TooManyPeers { max, got } => {
                write!(f, "Room supports at most {} remote peers, got {}", max, got)
            }
            SessionPlanError::NoIceServers => write!(f, "At least one ICE server is required"),
            SessionPlanError::UnsupportedIceUrl(url) => write!(f, "Unsupported ICE url: {}", url),
            SessionPlanError::TurnRequired => {
                write!(f, "At least one TURN server is required for reliable connectivity")
            }
        }
    }
}

impl Error for SessionPlanError {}

/// Failure to load a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Config IO error: {}", err),
            ConfigError::Json(err) => write!(f, "Config parse error: {}", err),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Json(err) => Some(err),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}
