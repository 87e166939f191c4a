//! Bounded ICE-restart policy.
//!
//! All retry bookkeeping for a link lives in a [`RetryState`] and is only
//! changed by [`ReconnectPolicy::decide`].

use std::time::Duration;

use quickshare_protocol::constants::{
    CONNECTION_TIMEOUT, MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFF_STEP,
};

use crate::state::PeerState;

/// Retry limits for one peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n` is `n * backoff_step` after a disconnect.
    pub backoff_step: Duration,
    /// How long a new link may take to reach `Connected`.
    pub connection_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff_step: RECONNECT_BACKOFF_STEP,
            connection_timeout: CONNECTION_TIMEOUT,
        }
    }
}

/// Per-link retry counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// What the owner of a link should do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    None,
    /// Connected again; the counter was cleared.
    Recovered,
    /// Restart ICE after `delay` if the link has not recovered by then.
    RestartIce { attempt: u32, delay: Duration },
    /// Attempts exhausted; surface a retry affordance.
    GiveUp,
    /// The link never connected within the connection timeout.
    TimedOut,
}

impl ReconnectPolicy {
    pub fn decide(&self, state: PeerState, retry: &mut RetryState) -> ReconnectAction {
        match state {
            PeerState::Connected => {
                let had_attempts = retry.attempts > 0;
                retry.attempts = 0;
                if had_attempts {
                    ReconnectAction::Recovered
                } else {
                    ReconnectAction::None
                }
            }
            PeerState::Disconnected | PeerState::Failed => {
                if retry.attempts >= self.max_attempts {
                    return ReconnectAction::GiveUp;
                }
                retry.attempts += 1;
                // Failed ICE will not heal by itself, so restart right away.
                let delay = if state == PeerState::Failed {
                    Duration::ZERO
                } else {
                    self.backoff_step * retry.attempts
                };
                ReconnectAction::RestartIce {
                    attempt: retry.attempts,
                    delay,
                }
            }
            PeerState::New | PeerState::Connecting | PeerState::Closed => ReconnectAction::None,
        }
    }

    /// Verdict once [`connection_timeout`](Self::connection_timeout) has
    /// passed since the link was created.
    pub fn on_connection_timeout(&self, state: PeerState) -> ReconnectAction {
        if state.is_connected() {
            ReconnectAction::None
        } else {
            ReconnectAction::TimedOut
        }
    }
}
