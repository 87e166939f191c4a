//! Peer-to-peer connectivity for QuickShare.
//!
//! A [`PeerLink`] wraps one WebRTC peer connection and applies perfect
//! negotiation through a [`Negotiator`]. The sender keeps one link per
//! receiver in a [`PeerManager`]. Offers, answers and candidates travel
//! over the [`SignalingClient`].

pub mod channel;
pub mod ice;
pub mod link;
pub mod manager;
pub mod negotiation;
mod pumps;
pub mod reconnection;
pub mod signaling_client;
pub mod state;

use std::time::Duration;

use quickshare_protocol::{PeerId, ProtocolError};
use tokio_tungstenite::tungstenite;

pub use channel::{ChannelMessage, RtcChannel};
pub use ice::{IceConfig, IceServer};
pub use link::{LinkEvent, PeerLink};
pub use manager::PeerManager;
pub use negotiation::{CandidateQueue, Negotiator, OfferDecision};
pub use reconnection::{ReconnectAction, ReconnectPolicy, RetryState};
pub use signaling_client::{SignalingClient, SignalingSender};
pub use state::PeerState;

/// Errors produced by the peer crate.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("data channel did not open within {0:?}")]
    ChannelOpenTimeout(Duration),

    #[error("peer connection has no local description")]
    NoLocalDescription,

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("signaling connection closed")]
    SignalingClosed,
}
