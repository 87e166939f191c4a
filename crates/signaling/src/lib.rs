//! Room registry and signaling relay for QuickShare.
//!
//! Accepts any number of WebSocket connections, groups them into rooms of
//! one sender and many receivers, and forwards connection-setup messages
//! (offers, answers, ICE candidates) between them without inspecting them.

mod connection;
mod handler;
mod hub;
pub mod registry;
pub mod relay;
mod server;

pub use connection::{PeerConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use hub::Hub;
pub use registry::{RegistryError, RegistryStats, RoomRegistry};
pub use server::{ServerConfig, SignalingServer};

/// Per-connection outbound queue capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the signaling server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server is already running")]
    AlreadyRunning,
}
