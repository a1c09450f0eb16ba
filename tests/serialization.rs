//! Integration tests for the control-message payload formats
//!
//! Every node in a cluster runs one configured format; these tests pin the
//! cross-format behavior of the richest payloads (info blocks and gossip
//! corrections) rather than enumerating every message type.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;

use mesh_transit::core::serialization::{WireFormat, WireMessage};
use mesh_transit::core::PROTOCOL_VERSION;
use mesh_transit::mesh::{GossipResponse, PeerUpdate};
use mesh_transit::protocol::{EventMessage, NodeInfo, PongMessage, ServiceSpec};

const ALL_FORMATS: [WireFormat; 3] = [
    WireFormat::Bincode,
    WireFormat::Json,
    WireFormat::MessagePack,
];

fn rich_info() -> NodeInfo {
    NodeInfo::new(
        "node-1",
        12,
        "10.0.0.1",
        7000,
        vec![
            ServiceSpec::new("users")
                .with_actions(&["users.get", "users.create"])
                .with_events(&["user.created"]),
            ServiceSpec::new("mailer").with_actions(&["mailer.send"]),
        ],
    )
}

#[test]
fn test_json_payloads_are_readable() {
    let info = rich_info();
    let bytes = info.encode(WireFormat::Json).expect("Failed to serialize");

    let json_str = std::str::from_utf8(&bytes).expect("Invalid UTF-8");
    assert!(json_str.contains("\"sender\":\"node-1\""));
    assert!(json_str.contains("users.create"));

    let recovered = NodeInfo::decode(&bytes, WireFormat::Json).expect("Failed to deserialize");
    assert_eq!(info, recovered);
}

#[test]
fn test_info_blocks_roundtrip_in_every_format() {
    let info = rich_info();
    for format in ALL_FORMATS {
        let bytes = info
            .encode(format)
            .unwrap_or_else(|e| panic!("encode failed for {}: {e}", format.name()));
        let recovered = NodeInfo::decode(&bytes, format)
            .unwrap_or_else(|e| panic!("decode failed for {}: {e}", format.name()));
        assert_eq!(info, recovered, "roundtrip failed for {}", format.name());
    }
}

#[test]
fn test_gossip_corrections_keep_their_variant_tags() {
    let mut online = BTreeMap::new();
    online.insert("node-a".to_string(), PeerUpdate::Info(rich_info()));
    online.insert(
        "node-b".to_string(),
        PeerUpdate::Cpu {
            cpu_seq: 5,
            cpu: 40,
        },
    );
    online.insert(
        "node-c".to_string(),
        PeerUpdate::InfoAndCpu {
            info: rich_info(),
            cpu_seq: 9,
            cpu: 12,
        },
    );
    let response = GossipResponse {
        ver: PROTOCOL_VERSION,
        sender: "node-d".to_string(),
        online: Some(online),
        offline: Some([("node-e".to_string(), 4u64)].into_iter().collect()),
    };

    for format in ALL_FORMATS {
        let bytes = response.encode(format).expect("encode");
        let recovered = GossipResponse::decode(&bytes, format).expect("decode");
        assert_eq!(response, recovered, "roundtrip failed for {}", format.name());
    }

    // the JSON form must carry explicit variant tags so a mixed-version
    // cluster fails loudly instead of misreading a correction
    let json = response.encode(WireFormat::Json).unwrap();
    let json_str = std::str::from_utf8(&json).unwrap();
    assert!(json_str.contains("\"Info\""));
    assert!(json_str.contains("\"Cpu\""));
    assert!(json_str.contains("\"InfoAndCpu\""));
}

#[test]
fn test_format_size_comparison() {
    let event = EventMessage::new("node-1", "cache.flush", vec![0xAB; 1024], true);

    let bincode_bytes = event.encode(WireFormat::Bincode).expect("Bincode failed");
    let json_bytes = event.encode(WireFormat::Json).expect("JSON failed");
    let msgpack_bytes = event.encode(WireFormat::MessagePack).expect("MessagePack failed");

    println!("Size comparison for a 1KB event payload:");
    println!("  Bincode:     {} bytes", bincode_bytes.len());
    println!("  JSON:        {} bytes", json_bytes.len());
    println!("  MessagePack: {} bytes", msgpack_bytes.len());

    assert!(bincode_bytes.len() <= msgpack_bytes.len());
    assert!(json_bytes.len() > bincode_bytes.len());
    assert!(json_bytes.len() > msgpack_bytes.len());
}

#[test]
fn test_unknown_format_names_are_rejected() {
    assert_eq!(WireFormat::from_name("xml"), None);
    assert_eq!(WireFormat::from_name("protobuf"), None);
    assert_eq!(WireFormat::from_name(""), None);

    // config names are case-insensitive with one alias
    assert_eq!(WireFormat::from_name("BINCODE"), Some(WireFormat::Bincode));
    assert_eq!(WireFormat::from_name("Json"), Some(WireFormat::Json));
    assert_eq!(
        WireFormat::from_name("MessagePack"),
        Some(WireFormat::MessagePack)
    );
    assert_eq!(
        WireFormat::from_name("msgpack"),
        Some(WireFormat::MessagePack)
    );
}

#[test]
fn test_pong_tolerates_a_missing_received_stamp() {
    // peers never fill `received`; it is stamped locally on receipt, so
    // payloads without it must still decode
    let wire = br#"{"ver":1,"sender":"node-b","id":4,"time":100,"arrived":105}"#;
    let pong = PongMessage::decode(wire, WireFormat::Json).expect("must tolerate the omission");
    assert_eq!(pong.id, 4);
    assert_eq!(pong.received, 0);
}
