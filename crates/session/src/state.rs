//! Public session states and events.

use std::fmt;

use quickshare_protocol::{FileEntry, PeerId, RoomCode, Role};
use quickshare_transfer::{Interrupted, ReceivedFile, TransferProgress, TransferReport};

/// Where a session stands, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    InRoom { room: RoomCode, role: Role },
    /// Waiting for the peer connection to come up.
    Connecting,
    /// The data channel is open.
    Ready { role: Role },
    /// An ICE restart is pending.
    Reconnecting { attempt: u32 },
    /// Retries are exhausted.
    Failed,
    /// The link never connected within the connection timeout.
    TimedOut,
    SenderLeft,
    Disconnected,
}

impl SessionState {
    /// Whether the user should be offered a retry action.
    pub fn needs_retry(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InRoom { room, .. } => write!(f, "Joined room: {room}"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Ready { role: Role::Sender } => f.write_str("Connected - Ready to transfer"),
            Self::Ready { role: Role::Receiver } => f.write_str("Connected - Ready to receive"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("Connection failed - Try reloading or retry"),
            Self::TimedOut => f.write_str("Connection timeout - Click retry to try again"),
            Self::SenderLeft => f.write_str("Sender left the room"),
            Self::Disconnected => f.write_str("Disconnected from server"),
        }
    }
}

/// Something a session reports to its caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),

    // Sender side.
    ReceiverJoined { peer_id: PeerId, receiver_count: usize },
    ReceiverLeft { peer_id: PeerId, receiver_count: usize },
    /// A receiver's data channel opened and got the file list.
    ReceiverReady { peer_id: PeerId },
    ReceiverReconnecting { peer_id: PeerId, attempt: u32 },
    /// A receiver's link gave up reconnecting or never connected in time.
    ReceiverFailed { peer_id: PeerId },
    TransferFinished(TransferReport),

    // Receiver side.
    FileList(Vec<FileEntry>),
    FileReceived(ReceivedFile),
    /// The channel went away mid-file; the partial data was discarded.
    Interrupted(Interrupted),

    // Both.
    Progress(TransferProgress),
    TransferFailed { file: Option<String>, error: String },
    ServerError(String),
}
