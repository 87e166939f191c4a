//! Client sessions for QuickShare.
//!
//! A [`SenderSession`] owns a room and serves files to every receiver that
//! joins it. A [`ReceiverSession`] joins a room by code and rebuilds the
//! files it is sent. Both run as a single event loop that owns all of the
//! session's mutable state; callers talk to a running loop through a
//! cloneable control handle and read [`SessionEvent`]s from a channel.

pub mod config;
pub mod receiver;
pub mod sender;
pub mod state;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use quickshare_peer::PeerError;
use quickshare_protocol::{ProtocolError, RoomCode, ServerEvent};
use quickshare_transfer::TransferError;

pub use config::{DEFAULT_SIGNALING_URL, SessionConfig};
pub use receiver::{ReceiverControl, ReceiverSession};
pub use sender::{SenderControl, SenderSession};
pub use state::{SessionEvent, SessionState};

/// Errors produced by a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("room code {0} is already in use")]
    RoomTaken(RoomCode),

    #[error("no free room code after {0} attempts")]
    RoomCodesExhausted(u32),

    #[error("signaling server error: {0}")]
    Server(String),

    #[error("unexpected reply from signaling server: {0}")]
    UnexpectedReply(&'static str),

    #[error("signaling server did not reply in time")]
    NoReply,

    #[error("signaling connection closed")]
    SignalingClosed,

    #[error("session has stopped")]
    SessionClosed,

    #[error("connection not ready")]
    NotReady,

    #[error("no receiver is connected")]
    NoReceivers,

    #[error("file index out of range: {0}")]
    FileIndexOutOfRange(usize),
}

/// How long to wait for the server to answer `create-room`/`join-room`.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

async fn next_reply(events: &mut mpsc::Receiver<ServerEvent>) -> Result<ServerEvent, SessionError> {
    match tokio::time::timeout(REPLY_TIMEOUT, events.recv()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(SessionError::SignalingClosed),
        Err(_) => Err(SessionError::NoReply),
    }
}

/// Hands `event` to the caller without waiting.
///
/// The session loop never blocks on its caller. A caller that stops draining
/// [`SessionEvent`]s loses the overflow, which is logged.
fn publish(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::warn!(?event, "session event channel full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("session events receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishing_never_waits_for_the_caller() {
        let (tx, mut rx) = mpsc::channel(1);
        publish(&tx, SessionEvent::ServerError("first".into()));
        publish(&tx, SessionEvent::ServerError("second".into()));

        match rx.try_recv() {
            Ok(SessionEvent::ServerError(message)) => assert_eq!(message, "first"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        drop(rx);
        publish(&tx, SessionEvent::ServerError("nobody listening".into()));
    }
}
