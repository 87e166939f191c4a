//! WebRTC data channel adapter.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use quickshare_protocol::PeerId;
use quickshare_protocol::constants::DATA_CHANNEL_OPEN_TIMEOUT;
use quickshare_transfer::{ChannelFuture, DataChannelSink, TransferError};

use crate::PeerError;
use crate::link::LinkEvent;

const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One inbound data-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

/// A data channel to one remote peer.
pub struct RtcChannel {
    remote_id: PeerId,
    dc: Arc<RTCDataChannel>,
}

impl RtcChannel {
    /// Wraps `dc` and forwards its open, message and close callbacks to
    /// `events`.
    pub(crate) fn attach(
        remote_id: PeerId,
        dc: Arc<RTCDataChannel>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Arc<Self> {
        let channel = Arc::new(Self {
            remote_id: remote_id.clone(),
            dc: Arc::clone(&dc),
        });

        let tx = events.clone();
        let opened = Arc::clone(&channel);
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                debug!(peer = %opened.remote_id, "data channel open");
                let _ = tx
                    .send(LinkEvent::ChannelOpen {
                        remote_id: opened.remote_id.clone(),
                        channel: opened,
                    })
                    .await;
            })
        }));

        let tx = events.clone();
        let id = remote_id.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            let remote_id = id.clone();
            Box::pin(async move {
                let message = if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => ChannelMessage::Text(text),
                        Err(e) => {
                            warn!(peer = %remote_id, "non-UTF-8 text frame: {e}");
                            return;
                        }
                    }
                } else {
                    ChannelMessage::Binary(msg.data)
                };
                let _ = tx.send(LinkEvent::Message { remote_id, message }).await;
            })
        }));

        let tx = events.clone();
        dc.on_close(Box::new(move || {
            let tx = tx.clone();
            let remote_id = remote_id.clone();
            Box::pin(async move {
                debug!(peer = %remote_id, "data channel closed");
                let _ = tx.send(LinkEvent::ChannelClosed { remote_id }).await;
            })
        }));

        tokio::spawn(watch_open(Arc::clone(&channel), DATA_CHANNEL_OPEN_TIMEOUT, events));
        channel
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Polls until the channel is open, failing after `timeout`.
    pub async fn wait_for_open(&self, timeout: Duration) -> Result<(), PeerError> {
        poll_until(|| self.dc.ready_state() == RTCDataChannelState::Open, timeout).await
    }

    fn is_closing(&self) -> bool {
        matches!(
            self.dc.ready_state(),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed
        )
    }

    pub async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(peer = %self.remote_id, "data channel close: {e}");
        }
    }
}

impl DataChannelSink for RtcChannel {
    fn label(&self) -> &str {
        &self.remote_id
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn buffered_amount(&self) -> ChannelFuture<'_, usize> {
        Box::pin(self.dc.buffered_amount())
    }

    fn send_text(&self, text: String) -> ChannelFuture<'_, Result<(), TransferError>> {
        Box::pin(async move {
            self.dc
                .send_text(text)
                .await
                .map(|_| ())
                .map_err(|e| channel_error(&self.remote_id, e))
        })
    }

    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, Result<(), TransferError>> {
        Box::pin(async move {
            self.dc
                .send(&data)
                .await
                .map(|_| ())
                .map_err(|e| channel_error(&self.remote_id, e))
        })
    }
}

async fn poll_until(mut ready: impl FnMut() -> bool, timeout: Duration) -> Result<(), PeerError> {
    let poll = async {
        while !ready() {
            tokio::time::sleep(OPEN_POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| PeerError::ChannelOpenTimeout(timeout))
}

/// Reports a channel that neither opened nor closed within `timeout`.
///
/// A channel closed in the meantime belongs to a link that was torn down
/// and is not reported.
async fn watch_open(channel: Arc<RtcChannel>, timeout: Duration, events: mpsc::Sender<LinkEvent>) {
    if channel.wait_for_open(timeout).await.is_ok() || channel.is_closing() {
        return;
    }
    warn!(peer = %channel.remote_id, ?timeout, "data channel did not open");
    let _ = events
        .send(LinkEvent::ChannelOpenTimeout {
            remote_id: channel.remote_id.clone(),
        })
        .await;
}

fn channel_error(remote_id: &str, e: webrtc::Error) -> TransferError {
    match e {
        webrtc::Error::ErrClosedPipe => TransferError::ChannelClosed(remote_id.to_string()),
        other => TransferError::Channel(other.to_string()),
    }
}
