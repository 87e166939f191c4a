//! Wire protocol shared by the QuickShare signaling server and peers.
//!
//! - [`signaling`]: JSON events over the signaling WebSocket.
//! - [`control`]: JSON control frames on the peer data channel.
//! - [`room_code`]: the short code that names a room.
//! - [`constants`]: timeouts, thresholds, and sizes used on both sides.

pub mod constants;
pub mod control;
pub mod room_code;
pub mod signaling;

pub use control::{ControlMessage, FileEntry};
pub use room_code::RoomCode;
pub use signaling::{ClientEvent, PeerId, Role, ServerEvent};

/// Errors produced while decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no type field")]
    MissingType,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),
}
