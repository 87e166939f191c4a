//! Reads signaling frames and forwards parsed events.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use quickshare_protocol::ServerEvent;
use quickshare_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

/// Forwards every [`ServerEvent`] to `events` until the socket ends, goes
/// silent for [`WS_PONG_WAIT`], or `cancel` fires. Dropping `events` on
/// return is how the owner learns the connection is gone.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events: mpsc::Sender<ServerEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            () = &mut deadline => {
                warn!("signaling server silent past pong deadline");
                break;
            }
            frame = read.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("signaling read error: {e}");
                break;
            }
            None => {
                debug!("signaling stream ended");
                break;
            }
        };
        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

        match msg {
            tungstenite::Message::Text(text) => {
                let Some(event) = parse_event(&text) else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    debug!("signaling event receiver dropped");
                    break;
                }
            }
            tungstenite::Message::Ping(data) => {
                let _ = write_tx.try_send(tungstenite::Message::Pong(data));
            }
            tungstenite::Message::Close(_) => {
                debug!("signaling server closed the socket");
                break;
            }
            _ => {}
        }
    }
}

fn parse_event(text: &str) -> Option<ServerEvent> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!(len = text.len(), "oversized signaling message dropped");
        return None;
    }
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::Unknown) => {
            warn!("unknown signaling event dropped");
            None
        }
        Ok(event) => {
            trace!(?event, "signaling event");
            Some(event)
        }
        Err(e) => {
            warn!("unparseable signaling message: {e}");
            None
        }
    }
}
