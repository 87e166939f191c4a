//! Sender-side fan-out: one peer link and data channel per receiver.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quickshare_protocol::PeerId;
use quickshare_transfer::DataChannelSink;

use crate::PeerError;
use crate::channel::RtcChannel;
use crate::ice::IceConfig;
use crate::link::{LinkEvent, PeerLink};
use crate::reconnection::{ReconnectAction, ReconnectPolicy, RetryState};
use crate::state::PeerState;

struct ReceiverPeer {
    link: Arc<PeerLink>,
    channel: Arc<RtcChannel>,
    retry: RetryState,
    /// Set while the link has yet to reach `Connected`.
    deadline: Option<Instant>,
}

/// Peer links keyed by receiver id.
///
/// Owned by the sender session's event loop; every method takes `&mut self`
/// so link creation and removal never interleave.
pub struct PeerManager {
    ice: IceConfig,
    policy: ReconnectPolicy,
    events: mpsc::Sender<LinkEvent>,
    peers: HashMap<PeerId, ReceiverPeer>,
}

impl PeerManager {
    pub fn new(ice: IceConfig, policy: ReconnectPolicy, events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            ice,
            policy,
            events,
            peers: HashMap::new(),
        }
    }

    /// Answers a receiver's `offer-request` with an offer for it.
    ///
    /// A receiver that asks again while a live link exists gets an ICE
    /// restart on the same link. A failed or closed link is replaced.
    /// Either way the link has [`ReconnectPolicy::connection_timeout`] to
    /// connect, see [`expire_overdue`](Self::expire_overdue).
    pub async fn on_offer_request(&mut self, receiver_id: &str) -> Result<Value, PeerError> {
        let deadline = Instant::now() + self.policy.connection_timeout;
        if let Some(peer) = self.peers.get_mut(receiver_id) {
            if !peer.link.state().is_terminal() {
                debug!(peer = receiver_id, "offer re-requested, restarting ICE");
                if !peer.link.state().is_connected() {
                    peer.deadline = Some(deadline);
                }
                return peer.link.restart_ice().await;
            }
            debug!(peer = receiver_id, "replacing terminal peer link");
            self.remove(receiver_id).await;
        }

        let link = Arc::new(
            PeerLink::new(receiver_id.to_string(), false, &self.ice, self.events.clone()).await?,
        );
        let channel = link.open_channel().await?;
        let offer = link.create_offer().await?;
        self.peers.insert(
            receiver_id.to_string(),
            ReceiverPeer {
                link,
                channel,
                retry: RetryState::default(),
                deadline: Some(deadline),
            },
        );
        info!(peer = receiver_id, receivers = self.peers.len(), "offer created");
        Ok(offer)
    }

    pub async fn on_answer(&mut self, receiver_id: &str, answer: Value) -> Result<(), PeerError> {
        let link = self.link(receiver_id)?;
        link.accept_answer(answer).await
    }

    pub async fn on_candidate(&mut self, from: &str, candidate: Value) -> Result<(), PeerError> {
        let link = self.link(from)?;
        link.add_candidate(candidate).await
    }

    /// Runs the reconnection policy for a state change on one link.
    pub fn on_state(&mut self, receiver_id: &str, state: PeerState) -> ReconnectAction {
        match self.peers.get_mut(receiver_id) {
            Some(peer) => {
                if state.is_connected() {
                    peer.deadline = None;
                }
                self.policy.decide(state, &mut peer.retry)
            }
            None => ReconnectAction::None,
        }
    }

    /// Earliest pending connection deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.peers.values().filter_map(|p| p.deadline).min()
    }

    /// Removes every link whose deadline passed before it connected and
    /// returns the receivers it belonged to.
    pub async fn expire_overdue(&mut self, now: Instant) -> Vec<PeerId> {
        let mut expired = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            if !peer.deadline.is_some_and(|d| d <= now) {
                continue;
            }
            peer.deadline = None;
            let state = peer.link.state();
            if self.policy.on_connection_timeout(state) == ReconnectAction::TimedOut {
                warn!(peer = %id, %state, "receiver did not connect in time");
                expired.push(id.clone());
            }
        }
        for id in &expired {
            self.remove(id).await;
        }
        expired
    }

    /// Closes and forgets one receiver's link. Returns `false` if unknown.
    pub async fn remove(&mut self, receiver_id: &str) -> bool {
        let Some(peer) = self.peers.remove(receiver_id) else {
            return false;
        };
        peer.channel.close().await;
        peer.link.close().await;
        info!(peer = receiver_id, receivers = self.peers.len(), "receiver removed");
        true
    }

    /// Channels currently open, ready for a broadcast.
    pub fn open_channels(&self) -> Vec<Arc<dyn DataChannelSink>> {
        self.peers
            .values()
            .filter(|p| p.channel.is_open())
            .map(|p| Arc::clone(&p.channel) as Arc<dyn DataChannelSink>)
            .collect()
    }

    pub fn channel(&self, receiver_id: &str) -> Option<Arc<RtcChannel>> {
        self.peers.get(receiver_id).map(|p| Arc::clone(&p.channel))
    }

    pub fn get(&self, receiver_id: &str) -> Option<Arc<PeerLink>> {
        self.peers.get(receiver_id).map(|p| Arc::clone(&p.link))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub async fn close_all(&mut self) {
        for (_, peer) in self.peers.drain() {
            peer.channel.close().await;
            peer.link.close().await;
        }
    }

    fn link(&self, receiver_id: &str) -> Result<Arc<PeerLink>, PeerError> {
        self.get(receiver_id)
            .ok_or_else(|| PeerError::UnknownPeer(receiver_id.to_string()))
    }
}
