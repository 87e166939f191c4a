//! Handler trait for signaling connections.
//!
//! The connection pumps own the socket; a [`Handler`] owns what the
//! events mean. [`crate::Hub`] is the production implementation.

use std::future::Future;
use std::pin::Pin;

use quickshare_protocol::{ClientEvent, PeerId};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives the lifecycle and parsed events of every signaling connection.
pub trait Handler: Send + Sync + 'static {
    /// Called once the WebSocket upgrade succeeds, before any event is read.
    fn on_connect(&self, peer: PeerId, sender: Sender) -> HandlerFuture<'_>;

    /// Called for each well-formed client event, in arrival order.
    fn on_event(&self, peer: PeerId, event: ClientEvent) -> HandlerFuture<'_>;

    /// Called once when the connection is gone.
    fn on_disconnect(&self, peer: PeerId) -> HandlerFuture<'_>;
}
