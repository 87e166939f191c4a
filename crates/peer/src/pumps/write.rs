//! Serialises outbound signaling frames onto the socket and keeps it alive.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use quickshare_protocol::constants::WS_PING_PERIOD;

/// Writes queued frames in order, with a ping every [`WS_PING_PERIOD`].
///
/// Ends after an explicit close frame, a write error, or cancellation. The
/// last two send a close frame of their own when the socket still accepts
/// one.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => match msg {
                Some(msg) => msg,
                None => {
                    debug!("signaling writer dropped");
                    break;
                }
            },
            _ = keepalive.tick() => {
                trace!("signaling ping");
                tungstenite::Message::Ping(Default::default())
            }
        };
        let closing = matches!(msg, tungstenite::Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            error!("signaling write error: {e}");
            return;
        }
        if closing {
            return;
        }
    }

    let _ = sink.send(tungstenite::Message::Close(None)).await;
}
