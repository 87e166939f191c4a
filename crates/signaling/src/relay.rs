//! Signaling relay: turns one client event into the server events it causes.
//!
//! Routing is a pure function of the registry and the event so it can be
//! tested without sockets. The caller delivers each [`Outbound`] to the
//! named connection; a connection that has vanished is simply skipped.

use serde_json::Value;
use tracing::{debug, info, warn};

use quickshare_protocol::constants::{
    ERR_NOT_MEMBER, ERR_ROOM_NOT_FOUND, ERR_ROOM_TAKEN, ERR_UNKNOWN_EVENT,
};
use quickshare_protocol::{ClientEvent, PeerId, Role, RoomCode, ServerEvent};

use crate::registry::{Departure, JoinOutcome, RoomRegistry};

/// A server event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PeerId,
    pub event: ServerEvent,
}

impl Outbound {
    fn new(to: impl Into<PeerId>, event: ServerEvent) -> Self {
        Self {
            to: to.into(),
            event,
        }
    }
}

/// Applies `event` from connection `from` and returns the messages to deliver.
pub fn route(registry: &mut RoomRegistry, from: &str, event: ClientEvent) -> Vec<Outbound> {
    match event {
        ClientEvent::CreateRoom { room_id } => create_room(registry, from, room_id),
        ClientEvent::JoinRoom { room_id } => join_room(registry, from, room_id),
        ClientEvent::RequestOffer { room_id } => request_offer(registry, from, &room_id),
        ClientEvent::Offer {
            room_id,
            offer,
            target_id,
        } => relay_payload(registry, from, &room_id, target_id, Payload::Offer(offer)),
        ClientEvent::Answer {
            room_id,
            answer,
            target_id,
        } => relay_payload(registry, from, &room_id, target_id, Payload::Answer(answer)),
        ClientEvent::IceCandidate {
            room_id,
            candidate,
            target_id,
        } => relay_payload(
            registry,
            from,
            &room_id,
            target_id,
            Payload::Candidate(candidate),
        ),
        ClientEvent::Unknown => {
            warn!(peer = %from, "unknown signaling event");
            vec![Outbound::new(from, ServerEvent::error(ERR_UNKNOWN_EVENT))]
        }
    }
}

/// Removes `peer` from the registry and notifies whoever is left behind.
pub fn route_disconnect(registry: &mut RoomRegistry, peer: &str) -> Vec<Outbound> {
    let mut out = Vec::new();
    for departure in registry.leave(peer) {
        match departure {
            Departure::ReceiverLeft {
                room,
                sender,
                receiver_count,
            } => {
                info!(%room, peer = %peer, receivers = receiver_count, "receiver left room");
                out.push(Outbound::new(
                    sender,
                    ServerEvent::PeerLeft {
                        peer_id: peer.to_string(),
                        receiver_count,
                    },
                ));
            }
            Departure::SenderLeft { room, receivers } => {
                info!(%room, receivers = receivers.len(), "sender left, room closed");
                out.extend(
                    receivers
                        .into_iter()
                        .map(|r| Outbound::new(r, ServerEvent::SenderLeft)),
                );
            }
        }
    }
    out
}

fn create_room(registry: &mut RoomRegistry, from: &str, room_id: RoomCode) -> Vec<Outbound> {
    match registry.create_room(room_id.clone(), from) {
        Ok(()) => {
            info!(room = %room_id, sender = %from, "room created");
            vec![Outbound::new(
                from,
                ServerEvent::RoomJoined {
                    room_id,
                    role: Role::Sender,
                    peer_count: 0,
                },
            )]
        }
        Err(e) => {
            warn!(peer = %from, "create-room rejected: {e}");
            vec![Outbound::new(from, ServerEvent::error(ERR_ROOM_TAKEN))]
        }
    }
}

fn join_room(registry: &mut RoomRegistry, from: &str, room_id: RoomCode) -> Vec<Outbound> {
    let outcome = match registry.join_room(&room_id, from) {
        Ok(o) => o,
        Err(_) => {
            debug!(room = %room_id, peer = %from, "join-room for missing room");
            return vec![Outbound::new(from, ServerEvent::error(ERR_ROOM_NOT_FOUND))];
        }
    };

    match outcome {
        JoinOutcome::Joined {
            sender,
            receiver_count,
        } => {
            info!(room = %room_id, peer = %from, receivers = receiver_count, "receiver joined room");
            vec![
                Outbound::new(
                    sender,
                    ServerEvent::PeerJoined {
                        peer_id: from.to_string(),
                        receiver_count,
                    },
                ),
                Outbound::new(
                    from,
                    ServerEvent::RoomJoined {
                        room_id,
                        role: Role::Receiver,
                        peer_count: receiver_count,
                    },
                ),
            ]
        }
        JoinOutcome::AlreadyJoined { receiver_count } => {
            debug!(room = %room_id, peer = %from, "duplicate join-room");
            vec![Outbound::new(
                from,
                ServerEvent::RoomJoined {
                    room_id,
                    role: Role::Receiver,
                    peer_count: receiver_count,
                },
            )]
        }
        JoinOutcome::OwnRoom { receiver_count } => vec![Outbound::new(
            from,
            ServerEvent::RoomJoined {
                room_id,
                role: Role::Sender,
                peer_count: receiver_count,
            },
        )],
    }
}

fn request_offer(registry: &RoomRegistry, from: &str, room_id: &RoomCode) -> Vec<Outbound> {
    let Some(room) = registry.room(room_id) else {
        return vec![Outbound::new(from, ServerEvent::error(ERR_ROOM_NOT_FOUND))];
    };
    if room.role_of(from) != Some(Role::Receiver) {
        return vec![Outbound::new(from, ServerEvent::error(ERR_NOT_MEMBER))];
    }
    vec![Outbound::new(
        room.sender().clone(),
        ServerEvent::OfferRequest {
            receiver_id: from.to_string(),
        },
    )]
}

enum Payload {
    Offer(Value),
    Answer(Value),
    Candidate(Value),
}

impl Payload {
    fn into_event(self, from: &str) -> ServerEvent {
        let from = from.to_string();
        match self {
            Payload::Offer(offer) => ServerEvent::Offer {
                offer,
                sender_id: from,
            },
            Payload::Answer(answer) => ServerEvent::Answer {
                answer,
                receiver_id: from,
            },
            Payload::Candidate(candidate) => ServerEvent::IceCandidate {
                candidate,
                sender_id: from,
            },
        }
    }
}

fn relay_payload(
    registry: &RoomRegistry,
    from: &str,
    room_id: &RoomCode,
    target_id: Option<PeerId>,
    payload: Payload,
) -> Vec<Outbound> {
    let Some(room) = registry.room(room_id) else {
        return vec![Outbound::new(from, ServerEvent::error(ERR_ROOM_NOT_FOUND))];
    };
    if room.role_of(from).is_none() {
        return vec![Outbound::new(from, ServerEvent::error(ERR_NOT_MEMBER))];
    }

    let targets = match target_id {
        Some(target) if target != from && room.role_of(&target).is_some() => vec![target],
        Some(target) => {
            debug!(room = %room_id, %target, "relay target not in room, dropping");
            Vec::new()
        }
        None => room.members_except(from),
    };

    let event = payload.into_event(from);
    targets
        .into_iter()
        .map(|to| Outbound::new(to, event.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code() -> RoomCode {
        RoomCode::parse("QWE123").unwrap()
    }

    fn room_with(receivers: &[&str]) -> RoomRegistry {
        let mut reg = RoomRegistry::new();
        route(&mut reg, "s", ClientEvent::CreateRoom { room_id: code() });
        for r in receivers {
            route(&mut reg, r, ClientEvent::JoinRoom { room_id: code() });
        }
        reg
    }

    #[test]
    fn create_room_confirms_sender_with_zero_peers() {
        let mut reg = RoomRegistry::new();
        let out = route(&mut reg, "s", ClientEvent::CreateRoom { room_id: code() });
        assert_eq!(
            out,
            vec![Outbound::new(
                "s",
                ServerEvent::RoomJoined {
                    room_id: code(),
                    role: Role::Sender,
                    peer_count: 0
                }
            )]
        );
    }

    #[test]
    fn create_room_collision_reports_error() {
        let mut reg = room_with(&[]);
        let out = route(&mut reg, "other", ClientEvent::CreateRoom { room_id: code() });
        assert_eq!(out, vec![Outbound::new("other", ServerEvent::error(ERR_ROOM_TAKEN))]);
    }

    #[test]
    fn join_notifies_sender_and_confirms_receiver() {
        let mut reg = room_with(&[]);
        let out = route(&mut reg, "r1", ClientEvent::JoinRoom { room_id: code() });
        assert_eq!(
            out,
            vec![
                Outbound::new(
                    "s",
                    ServerEvent::PeerJoined {
                        peer_id: "r1".into(),
                        receiver_count: 1
                    }
                ),
                Outbound::new(
                    "r1",
                    ServerEvent::RoomJoined {
                        room_id: code(),
                        role: Role::Receiver,
                        peer_count: 1
                    }
                ),
            ]
        );
    }

    #[test]
    fn duplicate_join_only_reconfirms() {
        let mut reg = room_with(&["r1"]);
        let out = route(&mut reg, "r1", ClientEvent::JoinRoom { room_id: code() });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "r1");
    }

    #[test]
    fn join_missing_room_reports_not_found() {
        let mut reg = RoomRegistry::new();
        let out = route(&mut reg, "r1", ClientEvent::JoinRoom { room_id: code() });
        assert_eq!(out, vec![Outbound::new("r1", ServerEvent::error(ERR_ROOM_NOT_FOUND))]);
    }

    #[test]
    fn request_offer_goes_only_to_sender() {
        let mut reg = room_with(&["r1", "r2"]);
        let out = route(&mut reg, "r2", ClientEvent::RequestOffer { room_id: code() });
        assert_eq!(
            out,
            vec![Outbound::new(
                "s",
                ServerEvent::OfferRequest {
                    receiver_id: "r2".into()
                }
            )]
        );
    }

    #[test]
    fn request_offer_from_outsider_is_rejected() {
        let mut reg = room_with(&["r1"]);
        let out = route(&mut reg, "x", ClientEvent::RequestOffer { room_id: code() });
        assert_eq!(out, vec![Outbound::new("x", ServerEvent::error(ERR_NOT_MEMBER))]);
    }

    #[test]
    fn targeted_offer_reaches_only_target_with_payload_untouched() {
        let mut reg = room_with(&["r1", "r2"]);
        let sdp = json!({"type": "offer", "sdp": "v=0\r\nweird"});
        let out = route(
            &mut reg,
            "s",
            ClientEvent::Offer {
                room_id: code(),
                offer: sdp.clone(),
                target_id: Some("r2".into()),
            },
        );
        assert_eq!(
            out,
            vec![Outbound::new(
                "r2",
                ServerEvent::Offer {
                    offer: sdp,
                    sender_id: "s".into()
                }
            )]
        );
    }

    #[test]
    fn untargeted_candidate_broadcasts_to_others() {
        let mut reg = room_with(&["r1", "r2"]);
        let out = route(
            &mut reg,
            "r1",
            ClientEvent::IceCandidate {
                room_id: code(),
                candidate: json!({"candidate": "c"}),
                target_id: None,
            },
        );
        let targets: Vec<_> = out.iter().map(|o| o.to.as_str()).collect();
        assert_eq!(targets, vec!["s", "r2"]);
    }

    #[test]
    fn answer_is_tagged_with_receiver_id() {
        let mut reg = room_with(&["r1"]);
        let out = route(
            &mut reg,
            "r1",
            ClientEvent::Answer {
                room_id: code(),
                answer: json!({"type": "answer"}),
                target_id: Some("s".into()),
            },
        );
        assert_eq!(
            out[0].event,
            ServerEvent::Answer {
                answer: json!({"type": "answer"}),
                receiver_id: "r1".into()
            }
        );
    }

    #[test]
    fn vanished_target_is_a_noop() {
        let mut reg = room_with(&["r1"]);
        let out = route(
            &mut reg,
            "s",
            ClientEvent::Offer {
                room_id: code(),
                offer: json!({}),
                target_id: Some("gone".into()),
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn relay_into_missing_room_errors_back() {
        let mut reg = RoomRegistry::new();
        let out = route(
            &mut reg,
            "s",
            ClientEvent::Answer {
                room_id: code(),
                answer: json!({}),
                target_id: None,
            },
        );
        assert_eq!(out, vec![Outbound::new("s", ServerEvent::error(ERR_ROOM_NOT_FOUND))]);
    }

    #[test]
    fn relay_from_non_member_errors_back() {
        let mut reg = room_with(&["r1"]);
        let out = route(
            &mut reg,
            "x",
            ClientEvent::Offer {
                room_id: code(),
                offer: json!({}),
                target_id: Some("r1".into()),
            },
        );
        assert_eq!(out, vec![Outbound::new("x", ServerEvent::error(ERR_NOT_MEMBER))]);
    }

    #[test]
    fn unknown_event_is_rejected() {
        let mut reg = RoomRegistry::new();
        let out = route(&mut reg, "p", ClientEvent::Unknown);
        assert_eq!(out, vec![Outbound::new("p", ServerEvent::error(ERR_UNKNOWN_EVENT))]);
    }

    #[test]
    fn receiver_disconnect_updates_sender_count() {
        let mut reg = room_with(&["r1", "r2"]);
        let out = route_disconnect(&mut reg, "r1");
        assert_eq!(
            out,
            vec![Outbound::new(
                "s",
                ServerEvent::PeerLeft {
                    peer_id: "r1".into(),
                    receiver_count: 1
                }
            )]
        );
    }

    #[test]
    fn sender_disconnect_notifies_every_receiver() {
        let mut reg = room_with(&["r1", "r2"]);
        let out = route_disconnect(&mut reg, "s");
        assert_eq!(
            out,
            vec![
                Outbound::new("r1", ServerEvent::SenderLeft),
                Outbound::new("r2", ServerEvent::SenderLeft),
            ]
        );
        assert!(!reg.contains(&code()));
    }
}
