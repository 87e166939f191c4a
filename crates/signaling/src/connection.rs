//! One signaling socket: a read pump feeding the [`Handler`] and a write
//! pump draining a bounded outbound queue.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use quickshare_protocol::constants::{ERR_ROOM_NOT_FOUND, WS_PING_PERIOD, WS_PONG_WAIT};
use quickshare_protocol::{ClientEvent, PeerId, ServerEvent};

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Outbound side of one connection.
///
/// Sends never wait: a peer that stops reading loses events instead of
/// stalling the relay for everyone else.
#[derive(Clone)]
pub struct Sender {
    queue: mpsc::Sender<WsMessage>,
}

impl Sender {
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), SendError> {
        let text = serde_json::to_string(event).map_err(|_| SendError)?;
        self.push(WsMessage::Text(text.into()))
    }

    pub fn is_connected(&self) -> bool {
        !self.queue.is_closed()
    }

    fn push(&self, frame: WsMessage) -> Result<(), SendError> {
        self.queue.try_send(frame).map_err(|e| {
            tracing::warn!(closed = matches!(e, mpsc::error::TrySendError::Closed(_)), "dropping outbound frame");
            SendError
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Handle to a running connection.
pub struct PeerConnection {
    pub peer_id: PeerId,
    sender: Sender,
    cancel: CancellationToken,
}

impl PeerConnection {
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Stops both pumps. The handler still sees `on_disconnect`.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Starts the pumps for an accepted WebSocket.
///
/// The handler sees `on_connect` first, then every parsed event, then
/// exactly one `on_disconnect` when the read side ends.
pub fn spawn_connection<S, H>(
    socket: S,
    peer_id: PeerId,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) -> PeerConnection
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send + 'static,
    H: Handler,
{
    let (queue, outbound) = mpsc::channel(SEND_BUFFER_SIZE);
    let sender = Sender { queue };
    let cancel = server_cancel.child_token();
    let (sink, stream) = socket.split();

    tokio::spawn(write_pump(sink, outbound, cancel.clone()));
    tokio::spawn({
        let sender = sender.clone();
        let cancel = cancel.clone();
        let peer_id = peer_id.clone();
        async move {
            handler.on_connect(peer_id.clone(), sender.clone()).await;
            read_pump(stream, &peer_id, &sender, handler.as_ref(), &cancel).await;
            cancel.cancel();
            handler.on_disconnect(peer_id.clone()).await;
            tracing::info!(peer = %peer_id, "peer disconnected");
        }
    });

    PeerConnection {
        peer_id,
        sender,
        cancel,
    }
}

/// Forwards queued frames to the socket and pings on a fixed period.
async fn write_pump<S>(mut sink: S, mut outbound: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break "cancelled",
            queued = outbound.recv() => match queued {
                Some(frame) => frame,
                None => break "queue closed",
            },
            _ = keepalive.tick() => WsMessage::Ping(Default::default()),
        };
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("signaling write failed: {e}");
            break "write error";
        }
    };
    tracing::trace!(reason, "write pump stopped");
    let _ = sink.close().await;
}

/// Parses text frames into [`ClientEvent`]s until the socket closes, errors
/// or stays silent past the pong deadline.
async fn read_pump<S, H>(
    mut stream: S,
    peer_id: &PeerId,
    sender: &Sender,
    handler: &H,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    H: Handler,
{
    let silence = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(silence);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            () = &mut silence => {
                tracing::warn!(peer = %peer_id, "no traffic before pong deadline, closing");
                return;
            }
            frame = stream.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!(peer = %peer_id, "signaling read failed: {e}");
                return;
            }
            None => return,
        };
        silence.as_mut().reset(Instant::now() + WS_PONG_WAIT);

        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    tracing::trace!(peer = %peer_id, kind = event.kind(), "signaling event");
                    handler.on_event(peer_id.clone(), event).await;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer_id, "malformed signaling message: {e}");
                    let _ = sender.send_event(&rejection(&text, &e));
                }
            },
            WsMessage::Ping(payload) => {
                let _ = sender.push(WsMessage::Pong(payload));
            }
            WsMessage::Close(_) => {
                tracing::debug!(peer = %peer_id, "close frame");
                return;
            }
            WsMessage::Binary(_) => {
                tracing::warn!(peer = %peer_id, "ignoring binary frame on signaling socket");
            }
            WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

/// Reply to a text frame that is not a valid [`ClientEvent`].
///
/// A join whose room code cannot parse names a room that cannot exist.
fn rejection(text: &str, e: &serde_json::Error) -> ServerEvent {
    let kind = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type")?.as_str().map(str::to_owned));
    match kind.as_deref() {
        Some("join-room") => ServerEvent::error(ERR_ROOM_NOT_FOUND),
        _ => ServerEvent::error(format!("invalid message: {e}")),
    }
}
