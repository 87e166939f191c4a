//! Perfect negotiation.
//!
//! Each side of a link has a fixed politeness. When both make an offer at
//! once the impolite side (the sender) ignores the incoming offer and the
//! polite side (the receiver) rolls its own offer back and accepts the
//! remote one. The state here is free of any WebRTC types so collisions
//! can be replayed in tests.

use quickshare_protocol::Role;

/// What to do with an incoming offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// No collision: apply it.
    Accept,
    /// Collision on the polite side: roll back the local offer, then apply.
    RollbackAndAccept,
    /// Collision on the impolite side: drop it.
    Ignore,
}

/// Negotiation flags for one peer connection.
#[derive(Debug, Clone)]
pub struct Negotiator {
    polite: bool,
    making_offer: bool,
    ignore_offer: bool,
}

impl Negotiator {
    pub fn new(polite: bool) -> Self {
        Self {
            polite,
            making_offer: false,
            ignore_offer: false,
        }
    }

    /// Receivers are polite, senders are not.
    pub fn for_role(role: Role) -> Self {
        Self::new(role == Role::Receiver)
    }

    pub fn is_polite(&self) -> bool {
        self.polite
    }

    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    /// True after the last remote offer was ignored. Candidate errors that
    /// belong to that offer are expected then.
    pub fn is_ignoring_offer(&self) -> bool {
        self.ignore_offer
    }

    pub fn on_local_offer_started(&mut self) {
        self.making_offer = true;
    }

    /// Call once the local offer is set (or failed).
    pub fn on_local_offer_done(&mut self) {
        self.making_offer = false;
    }

    /// Classifies a remote offer. `signaling_stable` is whether the
    /// connection currently has no offer outstanding.
    pub fn on_remote_offer(&mut self, signaling_stable: bool) -> OfferDecision {
        let collision = self.making_offer || !signaling_stable;
        self.ignore_offer = !self.polite && collision;
        if self.ignore_offer {
            OfferDecision::Ignore
        } else if collision {
            OfferDecision::RollbackAndAccept
        } else {
            OfferDecision::Accept
        }
    }
}

/// Remote ICE candidates that arrived before the remote description.
#[derive(Debug)]
pub struct CandidateQueue<T> {
    pending: Vec<T>,
    ready: bool,
}

impl<T> Default for CandidateQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            ready: false,
        }
    }
}

impl<T> CandidateQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back if it can be applied now, otherwise
    /// holds it until [`drain`](Self::drain).
    pub fn push(&mut self, candidate: T) -> Option<T> {
        if self.ready {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Marks the remote description as set and hands back everything queued,
    /// in arrival order.
    pub fn drain(&mut self) -> Vec<T> {
        self.ready = true;
        std::mem::take(&mut self.pending)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
