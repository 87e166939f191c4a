//! ICE server configuration.

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// One STUN or TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: String::new(),
            credential: String::new(),
        }
    }

    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: username.to_string(),
            credential: credential.to_string(),
        }
    }
}

/// Servers handed to every new peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
    /// Candidates gathered before an offer is made.
    pub candidate_pool_size: u8,
}

impl Default for IceConfig {
    /// Public Google STUN servers with the Open Relay TURN fallback.
    fn default() -> Self {
        let mut servers: Vec<IceServer> = [
            "stun:stun.l.google.com:19302",
            "stun:stun1.l.google.com:19302",
            "stun:stun2.l.google.com:19302",
            "stun:stun3.l.google.com:19302",
            "stun:stun4.l.google.com:19302",
        ]
        .into_iter()
        .map(IceServer::stun)
        .collect();

        for url in [
            "turn:openrelay.metered.ca:80",
            "turn:openrelay.metered.ca:443",
            "turn:openrelay.metered.ca:443?transport=tcp",
        ] {
            servers.push(IceServer::turn(url, "openrelayproject", "openrelayproject"));
        }

        Self {
            servers,
            candidate_pool_size: 10,
        }
    }
}

impl IceConfig {
    /// STUN only, for tests and LAN use.
    pub fn stun_only(url: &str) -> Self {
        Self {
            servers: vec![IceServer::stun(url)],
            candidate_pool_size: 0,
        }
    }

    /// No ICE servers at all; host candidates only.
    pub fn host_only() -> Self {
        Self {
            servers: Vec::new(),
            candidate_pool_size: 0,
        }
    }

    pub fn to_rtc(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ice_candidate_pool_size: self.candidate_pool_size,
            ..Default::default()
        }
    }
}
