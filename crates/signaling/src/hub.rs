//! The shared room registry plus the table of live connections.

use std::collections::HashMap;

use tokio::sync::Mutex;

use quickshare_protocol::{ClientEvent, PeerId};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};
use crate::registry::{RegistryStats, RoomRegistry};
use crate::relay::{self, Outbound};

#[derive(Default)]
struct HubState {
    registry: RoomRegistry,
    peers: HashMap<PeerId, Sender>,
}

impl HubState {
    fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { to, event } in outbound {
            match self.peers.get(&to) {
                Some(sender) => {
                    if sender.send_event(&event).is_err() {
                        tracing::debug!(peer = %to, "dropping event for unreachable peer");
                    }
                }
                None => tracing::debug!(peer = %to, "dropping event for vanished peer"),
            }
        }
    }
}

/// Applies signaling events to the registry and fans out the results.
///
/// One mutex covers both the registry and the connection table, so routing
/// and delivery of an event happen as a single step.
#[derive(Default)]
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.state.lock().await.registry.stats()
    }

    /// Number of open signaling connections, in a room or not.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }
}

impl Handler for Hub {
    fn on_connect(&self, peer: PeerId, sender: Sender) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::debug!(%peer, "peer connected");
            self.state.lock().await.peers.insert(peer, sender);
        })
    }

    fn on_event(&self, peer: PeerId, event: ClientEvent) -> HandlerFuture<'_> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let outbound = relay::route(&mut state.registry, &peer, event);
            state.deliver(outbound);
        })
    }

    fn on_disconnect(&self, peer: PeerId) -> HandlerFuture<'_> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.peers.remove(&peer);
            let outbound = relay::route_disconnect(&mut state.registry, &peer);
            state.deliver(outbound);
        })
    }
}
