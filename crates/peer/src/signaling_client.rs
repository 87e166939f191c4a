//! WebSocket client for the signaling server.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use quickshare_protocol::constants::WS_MAX_MESSAGE_SIZE;
use quickshare_protocol::{ClientEvent, ServerEvent};

use crate::PeerError;
use crate::pumps;

const OUTBOUND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Cloneable handle for sending events on the signaling socket.
#[derive(Clone)]
pub struct SignalingSender {
    write_tx: mpsc::Sender<tungstenite::Message>,
}

impl SignalingSender {
    pub async fn send(&self, event: &ClientEvent) -> Result<(), PeerError> {
        let json = serde_json::to_string(event)?;
        debug!(kind = event.kind(), "signaling send");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| PeerError::SignalingClosed)
    }

    pub fn is_connected(&self) -> bool {
        !self.write_tx.is_closed()
    }
}

/// A connected signaling socket.
///
/// Incoming events are read from [`take_events`](Self::take_events); the
/// receiver yields `None` once the connection is gone.
pub struct SignalingClient {
    sender: SignalingSender,
    events: Option<mpsc::Receiver<ServerEvent>>,
    cancel: CancellationToken,
    _read_handle: JoinHandle<()>,
    _write_handle: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self, PeerError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws, _) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        info!(url, "connected to signaling server");
        Ok(Self::from_stream(ws))
    }

    fn from_stream<S>(ws: S) -> Self
    where
        S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
            + futures_util::Sink<tungstenite::Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let (write, read) = ws.split();
        let (write_tx, write_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(pumps::write::write_pump(write, write_rx, cancel.clone()));
        let read_handle = tokio::spawn(pumps::read::read_pump(
            read,
            events_tx,
            write_tx.clone(),
            cancel.clone(),
        ));

        Self {
            sender: SignalingSender { write_tx },
            events: Some(events_rx),
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        }
    }

    pub async fn send(&self, event: &ClientEvent) -> Result<(), PeerError> {
        self.sender.send(event).await
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events.take()
    }

    /// Sends a close frame and stops the pumps.
    pub async fn close(&self) {
        let _ = self
            .sender
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
        self.cancel.cancel();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
