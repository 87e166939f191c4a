//! In-memory room registry.
//!
//! A room pairs one sender connection with an ordered list of receiver
//! connections. The registry is a plain synchronous value; the server keeps
//! it behind a single mutex so each signaling event is applied atomically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use quickshare_protocol::{PeerId, Role, RoomCode};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomCode),

    #[error("room code already in use: {0}")]
    RoomTaken(RoomCode),
}

/// A live room.
#[derive(Debug, Clone)]
pub struct Room {
    sender: PeerId,
    receivers: Vec<PeerId>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn new(sender: PeerId) -> Self {
        Self {
            sender,
            receivers: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> &PeerId {
        &self.sender
    }

    pub fn receivers(&self) -> &[PeerId] {
        &self.receivers
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Role of `peer` in this room, if it is a member.
    pub fn role_of(&self, peer: &str) -> Option<Role> {
        if self.sender == peer {
            Some(Role::Sender)
        } else if self.receivers.iter().any(|r| r == peer) {
            Some(Role::Receiver)
        } else {
            None
        }
    }

    /// Every member except `exclude`, sender first.
    pub fn members_except(&self, exclude: &str) -> Vec<PeerId> {
        std::iter::once(&self.sender)
            .chain(self.receivers.iter())
            .filter(|p| p.as_str() != exclude)
            .cloned()
            .collect()
    }
}

/// Result of a successful `join-room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller was added as a new receiver.
    Joined { sender: PeerId, receiver_count: usize },
    /// The caller was already a receiver; nothing changed.
    AlreadyJoined { receiver_count: usize },
    /// The caller is the room's own sender; nothing changed.
    OwnRoom { receiver_count: usize },
}

/// A membership change caused by a connection going away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    ReceiverLeft {
        room: RoomCode,
        sender: PeerId,
        receiver_count: usize,
    },
    SenderLeft {
        room: RoomCode,
        receivers: Vec<PeerId>,
    },
}

/// Snapshot of registry size, for periodic logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub peers: usize,
}

/// Room code → room mapping.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `code` with `sender` as its owner.
    ///
    /// Re-creating a room one already owns is a no-op. A code held by a
    /// different live sender is rejected so the caller can pick another.
    pub fn create_room(&mut self, code: RoomCode, sender: &str) -> Result<(), RegistryError> {
        if let Some(room) = self.rooms.get(&code) {
            if room.sender == sender {
                return Ok(());
            }
            return Err(RegistryError::RoomTaken(code));
        }
        self.rooms.insert(code, Room::new(sender.to_string()));
        Ok(())
    }

    /// Adds `peer` as a receiver of `code`, ignoring duplicate joins.
    pub fn join_room(&mut self, code: &RoomCode, peer: &str) -> Result<JoinOutcome, RegistryError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RegistryError::RoomNotFound(code.clone()))?;

        match room.role_of(peer) {
            Some(Role::Sender) => Ok(JoinOutcome::OwnRoom {
                receiver_count: room.receiver_count(),
            }),
            Some(Role::Receiver) => Ok(JoinOutcome::AlreadyJoined {
                receiver_count: room.receiver_count(),
            }),
            None => {
                room.receivers.push(peer.to_string());
                Ok(JoinOutcome::Joined {
                    sender: room.sender.clone(),
                    receiver_count: room.receiver_count(),
                })
            }
        }
    }

    /// Removes `peer` from every room it belongs to.
    ///
    /// Rooms owned by `peer` are destroyed and reported with the receivers
    /// that must be told the sender left.
    pub fn leave(&mut self, peer: &str) -> Vec<Departure> {
        let mut departures = Vec::new();

        let owned: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.sender == peer)
            .map(|(code, _)| code.clone())
            .collect();
        for code in owned {
            if let Some(room) = self.rooms.remove(&code) {
                departures.push(Departure::SenderLeft {
                    room: code,
                    receivers: room.receivers,
                });
            }
        }

        for (code, room) in self.rooms.iter_mut() {
            let before = room.receivers.len();
            room.receivers.retain(|r| r != peer);
            if room.receivers.len() != before {
                departures.push(Departure::ReceiverLeft {
                    room: code.clone(),
                    sender: room.sender.clone(),
                    receiver_count: room.receivers.len(),
                });
            }
        }

        departures
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Role of `peer` in `code`; `Ok(None)` if the room exists but the peer is not in it.
    pub fn role_of(&self, code: &RoomCode, peer: &str) -> Result<Option<Role>, RegistryError> {
        self.rooms
            .get(code)
            .map(|room| room.role_of(peer))
            .ok_or_else(|| RegistryError::RoomNotFound(code.clone()))
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            peers: self.rooms.values().map(|r| 1 + r.receiver_count()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    #[test]
    fn create_then_join_counts_one_receiver() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();

        let outcome = reg.join_room(&code("ROOM01"), "r1").unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                sender: "s".into(),
                receiver_count: 1
            }
        );
        assert_eq!(reg.role_of(&code("ROOM01"), "s").unwrap(), Some(Role::Sender));
        assert_eq!(reg.role_of(&code("ROOM01"), "r1").unwrap(), Some(Role::Receiver));
    }

    #[test]
    fn duplicate_join_is_idempotent() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        reg.join_room(&code("ROOM01"), "r1").unwrap();

        let again = reg.join_room(&code("ROOM01"), "r1").unwrap();
        assert_eq!(again, JoinOutcome::AlreadyJoined { receiver_count: 1 });
        assert_eq!(reg.room(&code("ROOM01")).unwrap().receivers(), ["r1"]);
    }

    #[test]
    fn sender_joining_own_room_changes_nothing() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        let outcome = reg.join_room(&code("ROOM01"), "s").unwrap();
        assert_eq!(outcome, JoinOutcome::OwnRoom { receiver_count: 0 });
        assert!(reg.room(&code("ROOM01")).unwrap().receivers().is_empty());
    }

    #[test]
    fn join_missing_room_has_no_side_effects() {
        let mut reg = RoomRegistry::new();
        let err = reg.join_room(&code("NOPE00"), "r1").unwrap_err();
        assert_eq!(err, RegistryError::RoomNotFound(code("NOPE00")));
        assert_eq!(reg.stats(), RegistryStats::default());
    }

    #[test]
    fn create_rejects_code_owned_by_another_sender() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s1").unwrap();
        assert_eq!(
            reg.create_room(code("ROOM01"), "s2"),
            Err(RegistryError::RoomTaken(code("ROOM01")))
        );
        assert_eq!(reg.room(&code("ROOM01")).unwrap().sender(), "s1");
    }

    #[test]
    fn create_is_idempotent_for_owner() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        reg.join_room(&code("ROOM01"), "r").unwrap();
        reg.create_room(code("ROOM01"), "s").unwrap();
        assert_eq!(reg.room(&code("ROOM01")).unwrap().receiver_count(), 1);
    }

    #[test]
    fn receiver_count_tracks_joins_and_departures() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        for i in 0..5 {
            reg.join_room(&code("ROOM01"), &format!("r{i}")).unwrap();
            reg.join_room(&code("ROOM01"), &format!("r{i}")).unwrap();
        }
        assert_eq!(reg.room(&code("ROOM01")).unwrap().receiver_count(), 5);

        let departures = reg.leave("r2");
        assert_eq!(
            departures,
            vec![Departure::ReceiverLeft {
                room: code("ROOM01"),
                sender: "s".into(),
                receiver_count: 4
            }]
        );
        assert_eq!(reg.room(&code("ROOM01")).unwrap().receiver_count(), 4);
    }

    #[test]
    fn sender_leaving_destroys_room() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        reg.join_room(&code("ROOM01"), "r1").unwrap();
        reg.join_room(&code("ROOM01"), "r2").unwrap();

        let departures = reg.leave("s");
        assert_eq!(
            departures,
            vec![Departure::SenderLeft {
                room: code("ROOM01"),
                receivers: vec!["r1".into(), "r2".into()]
            }]
        );
        assert!(!reg.contains(&code("ROOM01")));
    }

    #[test]
    fn leave_unknown_peer_is_noop() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        assert!(reg.leave("ghost").is_empty());
        assert_eq!(reg.stats(), RegistryStats { rooms: 1, peers: 1 });
    }

    #[test]
    fn members_except_excludes_caller() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s").unwrap();
        reg.join_room(&code("ROOM01"), "r1").unwrap();
        reg.join_room(&code("ROOM01"), "r2").unwrap();
        let room = reg.room(&code("ROOM01")).unwrap();
        assert_eq!(room.members_except("r1"), vec!["s".to_string(), "r2".to_string()]);
    }

    #[test]
    fn stats_count_rooms_and_peers() {
        let mut reg = RoomRegistry::new();
        reg.create_room(code("ROOM01"), "s1").unwrap();
        reg.create_room(code("ROOM02"), "s2").unwrap();
        reg.join_room(&code("ROOM02"), "r").unwrap();
        assert_eq!(reg.stats(), RegistryStats { rooms: 2, peers: 3 });
    }
}
