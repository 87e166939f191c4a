//! Signaling WebSocket server.
//!
//! Upgrades every accepted TCP connection to WebSocket, gives it a fresh
//! peer id and hands it to the [`Hub`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use quickshare_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::ServerError;
use crate::connection;
use crate::hub::Hub;
use crate::registry::RegistryStats;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port 0 lets the OS pick.
    pub bind_addr: SocketAddr,
    /// Largest accepted signaling frame.
    pub max_message_size: usize,
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 3001).into(),
            max_message_size: WS_MAX_MESSAGE_SIZE,
            stats_interval: Duration::from_secs(300),
        }
    }
}

/// A bound signaling server. Nothing is accepted until [`run`](Self::run).
pub struct SignalingServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    cancel: CancellationToken,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
}

impl SignalingServer {
    /// Binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Arc::new(Self {
            config,
            hub: Arc::new(Hub::new()),
            cancel: CancellationToken::new(),
            listener: Mutex::new(Some(listener)),
            local_addr,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Live room and peer counts.
    pub async fn stats(&self) -> RegistryStats {
        self.hub.stats().await
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accepts connections until [`shutdown`](Self::shutdown).
    ///
    /// Fails with [`ServerError::AlreadyRunning`] on a second call.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(ServerError::AlreadyRunning)?;
        tracing::info!(addr = %self.local_addr, "signaling server listening");

        tokio::spawn(stats_loop(
            Arc::clone(&self.hub),
            self.config.stats_interval,
            self.cancel.clone(),
        ));

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, remote) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            };
            let server = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = server.upgrade(stream, remote).await {
                    tracing::warn!(%remote, "WebSocket upgrade failed: {e}");
                }
            });
        }

        tracing::info!("signaling server stopped");
        Ok(())
    }

    async fn upgrade(&self, stream: TcpStream, remote: SocketAddr) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        let socket = accept_async_with_config(stream, Some(ws_config)).await?;

        let peer_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(%remote, peer = %peer_id, "peer connected");
        connection::spawn_connection(socket, peer_id, Arc::clone(&self.hub), self.cancel.clone());
        Ok(())
    }
}

/// Periodically logs how many rooms and peers are live.
async fn stats_loop(hub: Arc<Hub>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = hub.stats().await;
                let connections = hub.connection_count().await;
                tracing::info!(
                    rooms = stats.rooms,
                    peers = stats.peers,
                    connections,
                    "signaling keep-alive"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use quickshare_protocol::{ClientEvent, Role, RoomCode, ServerEvent};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start() -> (Arc<SignalingServer>, tokio::task::JoinHandle<()>, String) {
        let server = SignalingServer::bind(ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            ..Default::default()
        })
        .await
        .unwrap();
        let url = format!("ws://{}", server.local_addr());
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            running.run().await.unwrap();
        });
        (server, handle, url)
    }

    async fn send(ws: &mut Client, event: ClientEvent) {
        let text = serde_json::to_string(&event).unwrap();
        ws.send(WsMessage::Text(text.into())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(t) = frame {
                return serde_json::from_str(&t).unwrap();
            }
        }
    }

    fn code() -> RoomCode {
        RoomCode::parse("TEST42").unwrap()
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, handle, _) = start().await;
        assert!(server.local_addr().port() > 0);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_consumes_the_listener() {
        let server = SignalingServer::bind(ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            ..Default::default()
        })
        .await
        .unwrap();
        server.shutdown();
        assert!(server.run().await.is_ok());
        assert!(matches!(server.run().await, Err(ServerError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn create_join_and_leave_flow() {
        let (server, handle, url) = start().await;

        let (mut sender, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut sender, ClientEvent::CreateRoom { room_id: code() }).await;
        assert_eq!(
            recv(&mut sender).await,
            ServerEvent::RoomJoined {
                room_id: code(),
                role: Role::Sender,
                peer_count: 0
            }
        );

        let (mut receiver, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut receiver, ClientEvent::JoinRoom { room_id: code() }).await;
        assert_eq!(
            recv(&mut receiver).await,
            ServerEvent::RoomJoined {
                room_id: code(),
                role: Role::Receiver,
                peer_count: 1
            }
        );
        let receiver_id = match recv(&mut sender).await {
            ServerEvent::PeerJoined {
                peer_id,
                receiver_count,
            } => {
                assert_eq!(receiver_count, 1);
                peer_id
            }
            other => panic!("unexpected event: {other:?}"),
        };

        send(&mut receiver, ClientEvent::RequestOffer { room_id: code() }).await;
        assert_eq!(
            recv(&mut sender).await,
            ServerEvent::OfferRequest {
                receiver_id: receiver_id.clone()
            }
        );

        receiver.close(None).await.unwrap();
        assert_eq!(
            recv(&mut sender).await,
            ServerEvent::PeerLeft {
                peer_id: receiver_id,
                receiver_count: 0
            }
        );

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sender_disconnect_reaches_receivers() {
        let (server, handle, url) = start().await;

        let (mut sender, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut sender, ClientEvent::CreateRoom { room_id: code() }).await;
        recv(&mut sender).await;

        let (mut receiver, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(&mut receiver, ClientEvent::JoinRoom { room_id: code() }).await;
        recv(&mut receiver).await;

        sender.close(None).await.unwrap();
        assert_eq!(recv(&mut receiver).await, ServerEvent::SenderLeft);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats().await.rooms, 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_and_unknown_events_get_errors() {
        let (server, handle, url) = start().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        ws.send(WsMessage::Text("not json".into())).await.unwrap();
        assert!(matches!(recv(&mut ws).await, ServerEvent::Error { .. }));

        ws.send(WsMessage::Text(r#"{"type":"teleport"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            recv(&mut ws).await,
            ServerEvent::error(quickshare_protocol::constants::ERR_UNKNOWN_EVENT)
        );

        send(&mut ws, ClientEvent::JoinRoom { room_id: code() }).await;
        assert_eq!(
            recv(&mut ws).await,
            ServerEvent::error(quickshare_protocol::constants::ERR_ROOM_NOT_FOUND)
        );

        ws.send(WsMessage::Text(r#"{"type":"join-room","roomId":"??"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            recv(&mut ws).await,
            ServerEvent::error(quickshare_protocol::constants::ERR_ROOM_NOT_FOUND)
        );

        server.shutdown();
        handle.await.unwrap();
    }
}
