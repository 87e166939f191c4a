//! Connection state of one peer link.

use std::fmt;

use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Lifecycle of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    /// Transport lost; ICE may still recover.
    Disconnected,
    /// ICE gave up.
    Failed,
    Closed,
}

impl PeerState {
    pub fn from_rtc(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition(self, next: PeerState) -> bool {
        use PeerState::*;
        match (self, next) {
            (Closed, _) => false,
            (a, b) if a == b => false,
            (_, Closed) => true,
            (New, Connecting | Failed) => true,
            (Connecting, Connected | Disconnected | Failed) => true,
            (Connected, Disconnected | Failed) => true,
            (Disconnected, Connecting | Connected | Failed) => true,
            (Failed, Connecting) => true,
            _ => false,
        }
    }

    /// No recovery without outside action.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rtc_states() {
        assert_eq!(PeerState::from_rtc(RTCPeerConnectionState::Unspecified), PeerState::New);
        assert_eq!(
            PeerState::from_rtc(RTCPeerConnectionState::Connected),
            PeerState::Connected
        );
        assert_eq!(PeerState::from_rtc(RTCPeerConnectionState::Failed), PeerState::Failed);
    }

    #[test]
    fn closed_is_final() {
        for next in [
            PeerState::New,
            PeerState::Connecting,
            PeerState::Connected,
            PeerState::Failed,
        ] {
            assert!(!PeerState::Closed.can_transition(next));
        }
        assert!(PeerState::Closed.is_terminal());
    }

    #[test]
    fn recovery_paths() {
        assert!(PeerState::Disconnected.can_transition(PeerState::Connected));
        assert!(PeerState::Failed.can_transition(PeerState::Connecting));
        assert!(!PeerState::Failed.can_transition(PeerState::Connected));
        assert!(!PeerState::Connected.can_transition(PeerState::New));
        assert!(PeerState::Connected.can_transition(PeerState::Closed));
    }

    #[test]
    fn terminal_states() {
        assert!(PeerState::Failed.is_terminal());
        assert!(!PeerState::Disconnected.is_terminal());
        assert!(!PeerState::Connecting.is_terminal());
    }
}
