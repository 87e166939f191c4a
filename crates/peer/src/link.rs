//! One WebRTC peer connection with perfect negotiation applied.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use quickshare_protocol::PeerId;
use quickshare_protocol::constants::{DATA_CHANNEL_LABEL, ICE_GATHERING_GRACE};

use crate::PeerError;
use crate::channel::{ChannelMessage, RtcChannel};
use crate::ice::IceConfig;
use crate::negotiation::{CandidateQueue, Negotiator, OfferDecision};
use crate::state::PeerState;

/// Something a link reports to its owner.
pub enum LinkEvent {
    /// A local ICE candidate to relay to the remote peer.
    LocalCandidate { remote_id: PeerId, candidate: Value },
    StateChanged { remote_id: PeerId, state: PeerState },
    ChannelOpen {
        remote_id: PeerId,
        channel: Arc<RtcChannel>,
    },
    Message {
        remote_id: PeerId,
        message: ChannelMessage,
    },
    ChannelClosed { remote_id: PeerId },
    /// The data channel was still connecting when the open timeout ran out.
    ChannelOpenTimeout { remote_id: PeerId },
}

/// A peer connection to one remote peer.
pub struct PeerLink {
    remote_id: PeerId,
    pc: Arc<RTCPeerConnection>,
    negotiator: Mutex<Negotiator>,
    candidates: Mutex<CandidateQueue<RTCIceCandidateInit>>,
    events: mpsc::Sender<LinkEvent>,
}

impl PeerLink {
    /// Creates the connection and wires its callbacks to `events`.
    ///
    /// The remote side's data channel (if it opens one) is reported through
    /// [`LinkEvent::ChannelOpen`].
    pub async fn new(
        remote_id: PeerId,
        polite: bool,
        ice: &IceConfig,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(api.new_peer_connection(ice.to_rtc()).await?);

        let tx = events.clone();
        let id = remote_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            let remote_id = id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!(peer = %remote_id, "ICE gathering complete");
                    return;
                };
                match candidate.to_json().map(serde_json::to_value) {
                    Ok(Ok(candidate)) => {
                        let _ = tx.send(LinkEvent::LocalCandidate { remote_id, candidate }).await;
                    }
                    Ok(Err(e)) => warn!(peer = %remote_id, "candidate encode failed: {e}"),
                    Err(e) => warn!(peer = %remote_id, "candidate to_json failed: {e}"),
                }
            })
        }));

        let tx = events.clone();
        let id = remote_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = tx.clone();
            let remote_id = id.clone();
            Box::pin(async move {
                let state = PeerState::from_rtc(s);
                info!(peer = %remote_id, %state, "peer connection state");
                let _ = tx.send(LinkEvent::StateChanged { remote_id, state }).await;
            })
        }));

        let tx = events.clone();
        let id = remote_id.clone();
        pc.on_data_channel(Box::new(move |dc| {
            debug!(peer = %id, label = dc.label(), "remote data channel announced");
            RtcChannel::attach(id.clone(), dc, tx.clone());
            Box::pin(async {})
        }));

        Ok(Self {
            remote_id,
            pc,
            negotiator: Mutex::new(Negotiator::new(polite)),
            candidates: Mutex::new(CandidateQueue::new()),
            events,
        })
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_rtc(self.pc.connection_state())
    }

    /// Opens the ordered, reliable transfer channel. Only the offering side
    /// calls this.
    pub async fn open_channel(&self) -> Result<Arc<RtcChannel>, PeerError> {
        let dc = self
            .pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        Ok(RtcChannel::attach(
            self.remote_id.clone(),
            dc,
            self.events.clone(),
        ))
    }

    /// Creates and applies a local offer, returning it for signaling.
    pub async fn create_offer(&self) -> Result<Value, PeerError> {
        self.make_offer(None).await
    }

    /// Like [`create_offer`](Self::create_offer) but with fresh ICE
    /// credentials, so the transport re-gathers and re-checks.
    pub async fn restart_ice(&self) -> Result<Value, PeerError> {
        info!(peer = %self.remote_id, "restarting ICE");
        self.make_offer(Some(RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        }))
        .await
    }

    async fn make_offer(&self, options: Option<RTCOfferOptions>) -> Result<Value, PeerError> {
        self.with_negotiator(Negotiator::on_local_offer_started);
        let result: Result<Value, PeerError> = async {
            let offer = self.pc.create_offer(options).await?;
            self.apply_local(offer).await
        }
        .await;
        self.with_negotiator(Negotiator::on_local_offer_done);
        result
    }

    /// Applies a remote offer. Returns the answer to send back, or `None`
    /// when the offer lost a collision and was ignored.
    pub async fn accept_offer(&self, offer: Value) -> Result<Option<Value>, PeerError> {
        let offer: RTCSessionDescription = serde_json::from_value(offer)?;
        let stable = self.pc.signaling_state() == RTCSignalingState::Stable;
        let decision = self.with_negotiator(|n| n.on_remote_offer(stable));

        match decision {
            OfferDecision::Ignore => {
                info!(peer = %self.remote_id, "ignoring colliding offer");
                return Ok(None);
            }
            OfferDecision::RollbackAndAccept => {
                info!(peer = %self.remote_id, "offer collision, rolling back local offer");
                let mut rollback = RTCSessionDescription::default();
                rollback.sdp_type = RTCSdpType::Rollback;
                self.pc.set_local_description(rollback).await?;
            }
            OfferDecision::Accept => {}
        }

        self.pc.set_remote_description(offer).await?;
        self.flush_candidates().await;

        let answer = self.pc.create_answer(None).await?;
        self.apply_local(answer).await.map(Some)
    }

    /// Applies the remote answer to our outstanding offer. Stale answers
    /// (no offer outstanding) are dropped.
    pub async fn accept_answer(&self, answer: Value) -> Result<(), PeerError> {
        if self.pc.signaling_state() != RTCSignalingState::HaveLocalOffer {
            debug!(peer = %self.remote_id, "no offer outstanding, dropping answer");
            return Ok(());
        }
        let answer: RTCSessionDescription = serde_json::from_value(answer)?;
        self.pc.set_remote_description(answer).await?;
        self.flush_candidates().await;
        Ok(())
    }

    /// Adds a remote candidate, queueing it until the remote description
    /// is known.
    pub async fn add_candidate(&self, candidate: Value) -> Result<(), PeerError> {
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        let ready = self
            .candidates
            .lock()
            .map(|mut q| q.push(candidate))
            .unwrap_or(None);
        if let Some(candidate) = ready {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(peer = %self.remote_id, "peer connection close: {e}");
        }
    }

    async fn flush_candidates(&self) {
        let queued = self
            .candidates
            .lock()
            .map(|mut q| q.drain())
            .unwrap_or_default();
        if !queued.is_empty() {
            debug!(peer = %self.remote_id, count = queued.len(), "applying queued ICE candidates");
        }
        for candidate in queued {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: RTCIceCandidateInit) {
        if let Err(e) = self.pc.add_ice_candidate(candidate).await {
            let ignoring = self.with_negotiator(|n| n.is_ignoring_offer());
            if !ignoring {
                warn!(peer = %self.remote_id, "failed to add ICE candidate: {e}");
            }
        }
    }

    /// Sets `desc` as the local description and waits up to
    /// [`ICE_GATHERING_GRACE`] so it carries host and srflx candidates.
    async fn apply_local(&self, desc: RTCSessionDescription) -> Result<Value, PeerError> {
        let kind = desc.sdp_type;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await?;
        if tokio::time::timeout(ICE_GATHERING_GRACE, gathered.recv())
            .await
            .is_err()
        {
            debug!(peer = %self.remote_id, %kind, "ICE gathering still running, sending anyway");
        }
        self.local_description().await
    }

    async fn local_description(&self) -> Result<Value, PeerError> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or(PeerError::NoLocalDescription)?;
        Ok(serde_json::to_value(desc)?)
    }

    fn with_negotiator<T>(&self, f: impl FnOnce(&mut Negotiator) -> T) -> T {
        match self.negotiator.lock() {
            Ok(mut n) => f(&mut *n),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;

    async fn link(id: &str, polite: bool) -> (PeerLink, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let link = PeerLink::new(id.to_string(), polite, &IceConfig::host_only(), tx)
            .await
            .unwrap();
        (link, rx)
    }

    #[tokio::test]
    async fn answers_wait_for_candidate_gathering() {
        let (offerer, _offer_events) = link("receiver", false).await;
        let (answerer, _answer_events) = link("sender", true).await;

        offerer.open_channel().await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(offer).await.unwrap().unwrap();

        assert_eq!(answer["type"], "answer");
        assert_eq!(
            answerer.pc.ice_gathering_state(),
            RTCIceGatheringState::Complete
        );
        offerer.close().await;
        answerer.close().await;
    }
}
