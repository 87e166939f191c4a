//! Signaling events exchanged with the room server.
//!
//! Every event is a JSON object tagged by `"type"` (kebab-case) with
//! camelCase fields. SDP and ICE payloads are carried as opaque JSON values:
//! the relay forwards them without looking inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room_code::RoomCode;

/// Opaque server-assigned identifier of one signaling connection.
pub type PeerId = String;

/// Role of a connection within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// Events sent by a client to the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    CreateRoom { room_id: RoomCode },

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomCode },

    #[serde(rename_all = "camelCase")]
    RequestOffer { room_id: RoomCode },

    #[serde(rename_all = "camelCase")]
    Offer {
        room_id: RoomCode,
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PeerId>,
    },

    #[serde(rename_all = "camelCase")]
    Answer {
        room_id: RoomCode,
        answer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PeerId>,
    },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        room_id: RoomCode,
        candidate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PeerId>,
    },

    /// Any `type` this build does not know. The server answers with an error.
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    /// Room the event addresses, if any.
    pub fn room_id(&self) -> Option<&RoomCode> {
        match self {
            Self::CreateRoom { room_id }
            | Self::JoinRoom { room_id }
            | Self::RequestOffer { room_id }
            | Self::Offer { room_id, .. }
            | Self::Answer { room_id, .. }
            | Self::IceCandidate { room_id, .. } => Some(room_id),
            Self::Unknown => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::RequestOffer { .. } => "request-offer",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Unknown => "unknown",
        }
    }
}

/// Events sent by the signaling server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: RoomCode,
        role: Role,
        peer_count: usize,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: PeerId, receiver_count: usize },

    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId, receiver_count: usize },

    SenderLeft,

    #[serde(rename_all = "camelCase")]
    OfferRequest { receiver_id: PeerId },

    #[serde(rename_all = "camelCase")]
    Offer { offer: Value, sender_id: PeerId },

    #[serde(rename_all = "camelCase")]
    Answer { answer: Value, receiver_id: PeerId },

    #[serde(rename_all = "camelCase")]
    IceCandidate { candidate: Value, sender_id: PeerId },

    Error { message: String },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
