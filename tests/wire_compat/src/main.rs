fn main() {
    println!("Run `cargo test -p quickshare-wire-compat` to check the JSON wire format.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use quickshare_protocol::{ClientEvent, ControlMessage, ProtocolError, Role, ServerEvent};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values.
    ///
    /// Field order is irrelevant; every field the browser client sends must
    /// survive, and nothing may be added.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to serialize {name}: {e}"));
        assert_eq!(fixture, reserialized, "roundtrip mismatch for {name}");
        parsed
    }

    // --- Client to server ---

    #[test]
    fn fixture_create_room() {
        let event = roundtrip_test::<ClientEvent>("client/create_room.json");
        assert_eq!(event.kind(), "create-room");
        assert_eq!(event.room_id().map(|r| r.as_str()), Some("K7Q2XZ"));
    }

    #[test]
    fn fixture_join_room() {
        roundtrip_test::<ClientEvent>("client/join_room.json");
    }

    #[test]
    fn fixture_request_offer() {
        roundtrip_test::<ClientEvent>("client/request_offer.json");
    }

    #[test]
    fn fixture_offer_targeted() {
        match roundtrip_test::<ClientEvent>("client/offer_targeted.json") {
            ClientEvent::Offer { target_id, offer, .. } => {
                assert_eq!(
                    target_id.as_deref(),
                    Some("3f2a9c1e-5b7d-4e8a-9c0f-1d2e3f4a5b6c")
                );
                assert_eq!(offer["type"], "offer");
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn fixture_offer_without_target() {
        match roundtrip_test::<ClientEvent>("client/offer_broadcast.json") {
            ClientEvent::Offer { target_id, .. } => assert!(target_id.is_none()),
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn fixture_client_answer() {
        roundtrip_test::<ClientEvent>("client/answer.json");
    }

    #[test]
    fn fixture_client_ice_candidate() {
        match roundtrip_test::<ClientEvent>("client/ice_candidate.json") {
            ClientEvent::IceCandidate { candidate, .. } => {
                assert_eq!(candidate["sdpMLineIndex"], 0);
                assert_eq!(candidate["usernameFragment"], "aB3d");
            }
            other => panic!("expected ice-candidate, got {other:?}"),
        }
    }

    #[test]
    fn lowercase_room_code_is_normalized() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join-room","roomId":"k7q2xz"}"#).unwrap();
        assert_eq!(event.room_id().map(|r| r.as_str()), Some("K7Q2XZ"));
    }

    #[test]
    fn malformed_room_code_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"join-room","roomId":"AB-12"}"#).is_err());
    }

    #[test]
    fn unknown_client_kind_is_kept_as_unknown() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"leave-room","roomId":"K7Q2XZ"}"#).unwrap();
        assert_eq!(event, ClientEvent::Unknown);
    }

    // --- Server to client ---

    #[test]
    fn fixture_room_joined_sender() {
        match roundtrip_test::<ServerEvent>("server/room_joined_sender.json") {
            ServerEvent::RoomJoined { role, peer_count, .. } => {
                assert_eq!(role, Role::Sender);
                assert_eq!(peer_count, 0);
            }
            other => panic!("expected room-joined, got {other:?}"),
        }
    }

    #[test]
    fn fixture_room_joined_receiver() {
        match roundtrip_test::<ServerEvent>("server/room_joined_receiver.json") {
            ServerEvent::RoomJoined { role, peer_count, .. } => {
                assert_eq!(role, Role::Receiver);
                assert_eq!(peer_count, 2);
            }
            other => panic!("expected room-joined, got {other:?}"),
        }
    }

    #[test]
    fn fixture_peer_joined() {
        roundtrip_test::<ServerEvent>("server/peer_joined.json");
    }

    #[test]
    fn fixture_peer_left() {
        roundtrip_test::<ServerEvent>("server/peer_left.json");
    }

    #[test]
    fn fixture_sender_left() {
        assert_eq!(
            roundtrip_test::<ServerEvent>("server/sender_left.json"),
            ServerEvent::SenderLeft
        );
    }

    #[test]
    fn fixture_offer_request() {
        roundtrip_test::<ServerEvent>("server/offer_request.json");
    }

    #[test]
    fn fixture_server_offer() {
        roundtrip_test::<ServerEvent>("server/offer.json");
    }

    #[test]
    fn fixture_server_answer() {
        roundtrip_test::<ServerEvent>("server/answer.json");
    }

    #[test]
    fn fixture_server_ice_candidate() {
        roundtrip_test::<ServerEvent>("server/ice_candidate.json");
    }

    #[test]
    fn fixture_error() {
        assert_eq!(
            roundtrip_test::<ServerEvent>("server/error.json"),
            ServerEvent::error(quickshare_protocol::constants::ERR_ROOM_NOT_FOUND)
        );
    }

    #[test]
    fn unknown_server_kind_is_kept_as_unknown() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"room-closed"}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    // --- Data channel ---

    #[test]
    fn fixture_file_list() {
        match roundtrip_test::<ControlMessage>("control/file_list.json") {
            ControlMessage::FileList { files } => {
                assert_eq!(files.len(), 3);
                assert_eq!(files[2].size, 7_340_032_000);
                assert!(files.iter().enumerate().all(|(i, f)| f.index == i));
            }
            other => panic!("expected file-list, got {other:?}"),
        }
    }

    #[test]
    fn fixture_download_request() {
        assert_eq!(
            roundtrip_test::<ControlMessage>("control/download_request.json"),
            ControlMessage::DownloadRequest { file_index: 2 }
        );
    }

    #[test]
    fn fixture_file_metadata() {
        roundtrip_test::<ControlMessage>("control/file_metadata.json");
    }

    #[test]
    fn fixture_file_end() {
        assert_eq!(
            roundtrip_test::<ControlMessage>("control/file_end.json"),
            ControlMessage::FileEnd
        );
    }

    #[test]
    fn control_fixtures_pass_the_frame_parser() {
        for name in [
            "control/file_list.json",
            "control/download_request.json",
            "control/file_metadata.json",
            "control/file_end.json",
        ] {
            let text = fs::read_to_string(fixtures_dir().join(name)).unwrap();
            ControlMessage::parse(&text).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn unknown_control_kind_is_reported_by_name() {
        assert!(matches!(
            ControlMessage::parse(r#"{"type":"pause-transfer"}"#),
            Err(ProtocolError::UnknownKind(kind)) if kind == "pause-transfer"
        ));
    }
}
