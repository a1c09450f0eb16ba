//! Property-based tests using proptest
//!
//! These tests validate framing and membership invariants across a wide
//! range of randomly generated inputs, ensuring robust behavior under all
//! conditions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use mesh_transit::core::{Packet, PacketCodec, PacketKind, HEADER_LEN, PROTOCOL_VERSION};
use mesh_transit::mesh::{DescriptorView, GossipRequest, GossipRound, NodeDescriptor};
use mesh_transit::protocol::NodeInfo;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::codec::{Decoder, Encoder};

const TEST_MAX_PACKET: usize = 1024 * 1024;

fn kind_strategy() -> impl Strategy<Value = PacketKind> {
    prop::sample::select(vec![
        PacketKind::Event,
        PacketKind::Request,
        PacketKind::Response,
        PacketKind::Ping,
        PacketKind::Pong,
        PacketKind::GossipRequest,
        PacketKind::GossipResponse,
        PacketKind::GossipHello,
    ])
}

// Property: Any frame survives an encode/decode cycle through the codec
proptest! {
    #[test]
    fn prop_frame_roundtrip(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let mut codec = PacketCodec::new(TEST_MAX_PACKET);
        let packet = Packet::new(kind, payload);

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).expect("Encoding should not fail");
        let decoded = codec.decode(&mut buf).expect("Decoding should not fail").expect("A full frame must decode");

        prop_assert_eq!(decoded, packet);
        prop_assert!(buf.is_empty());
    }
}

// Property: Frame encoding is deterministic
proptest! {
    #[test]
    fn prop_frame_encoding_deterministic(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let packet = Packet::new(kind, payload);

        let bytes1 = packet.to_bytes(TEST_MAX_PACKET).expect("Encoding should not fail");
        let bytes2 = packet.to_bytes(TEST_MAX_PACKET).expect("Encoding should not fail");

        prop_assert_eq!(bytes1, bytes2);
    }
}

// Property: Any single-bit corruption of the header is caught by the crc
// before the declared length can steer a buffer read
proptest! {
    #[test]
    fn prop_corrupt_header_is_rejected(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
        bit in 0usize..(HEADER_LEN * 8),
    ) {
        let frame = Packet::new(kind, payload).to_bytes(TEST_MAX_PACKET).expect("Encoding should not fail");
        let mut corrupted = BytesMut::from(&frame[..]);
        corrupted[bit / 8] ^= 1 << (bit % 8);

        let mut codec = PacketCodec::new(TEST_MAX_PACKET);
        prop_assert!(codec.decode(&mut corrupted).is_err());
    }
}

// Property: A truncated frame never errors and never consumes bytes; the
// decoder just waits for the rest of the stream
proptest! {
    #[test]
    fn prop_truncated_frame_waits(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 1..1024),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = Packet::new(kind, payload).to_bytes(TEST_MAX_PACKET).expect("Encoding should not fail");
        let keep = cut.index(frame.len());
        let mut buf = BytesMut::from(&frame[..keep]);

        let mut codec = PacketCodec::new(TEST_MAX_PACKET);
        prop_assert!(codec.decode(&mut buf).expect("A short frame is not an error").is_none());
        prop_assert_eq!(buf.len(), keep);
    }
}

#[derive(Debug, Clone)]
enum MergeOp {
    /// Gossip-asserted offline marker carrying the claimant's seq.
    Claim(u64),
    /// Full info push (seq >= 1; a zero-seq push is never accepted).
    Push(u64),
}

fn merge_op_strategy() -> impl Strategy<Value = MergeOp> {
    prop_oneof![
        (0u64..50).prop_map(MergeOp::Claim),
        (1u64..50).prop_map(MergeOp::Push),
    ]
}

// Property: Descriptor merges follow the freshness rules exactly: offline
// claims need seq >= current, info pushes while online need seq > current,
// and a push onto an offline descriptor is always adopted (reinstatement
// after false suspicion or restart accepts a smaller seq)
proptest! {
    #[test]
    fn prop_descriptor_merge_follows_freshness_rules(
        ops in prop::collection::vec(merge_op_strategy(), 1..40),
    ) {
        let descriptor = NodeDescriptor::new_offline("node-7", "10.1.0.7", 7100);
        let mut seq_model = 0u64;
        let mut online_model = false;

        for op in ops {
            match op {
                MergeOp::Claim(claimed) => {
                    descriptor.mark_offline_with_seq(claimed).unwrap();
                    if claimed >= seq_model {
                        seq_model = claimed;
                        online_model = false;
                    }
                }
                MergeOp::Push(seq) => {
                    let info = NodeInfo::new("node-7", seq, "10.1.0.7", 7100, Vec::new());
                    descriptor.mark_online(info).unwrap();
                    if !online_model || seq > seq_model {
                        seq_model = seq;
                        online_model = true;
                    }
                }
            }

            prop_assert_eq!(descriptor.seq().unwrap(), seq_model);
            prop_assert_eq!(descriptor.is_online().unwrap(), online_model);
        }
    }
}

// Property: Defending against an offline claim always yields a seq strictly
// above the claim, and the local seq never moves backwards
proptest! {
    #[test]
    fn prop_defense_always_outbids_the_claim(
        claims in prop::collection::vec(any::<u32>(), 1..32),
    ) {
        let local = NodeDescriptor::new_local("node-a", "10.0.0.1", 7000);
        let mut previous = local.seq().unwrap();

        for claimed in claims {
            let defended = local.defend_seq(u64::from(claimed)).unwrap();
            prop_assert!(defended > u64::from(claimed));
            prop_assert!(defended >= previous);
            previous = defended;
        }
    }
}

fn candidate(node_id: String, port: u16, offline_since: u64) -> DescriptorView {
    DescriptorView {
        node_id,
        local: false,
        host: format!("10.9.0.{}", port % 200),
        port,
        seq: 1,
        cpu_seq: 0,
        cpu: 0,
        cpu_when: 0,
        offline_since,
    }
}

// Property: Target selection draws at most one live and one unreachable
// endpoint, always from the round's own candidate partition
proptest! {
    #[test]
    fn prop_targets_stay_inside_candidate_sets(
        live_count in 0usize..6,
        dead_count in 0usize..6,
        seed in any::<u64>(),
    ) {
        let live: Vec<DescriptorView> = (0..live_count)
            .map(|i| candidate(format!("live-{i}"), 7000 + i as u16, 0))
            .collect();
        let unreachable: Vec<DescriptorView> = (0..dead_count)
            .map(|i| candidate(format!("dead-{i}"), 8000 + i as u16, 1))
            .collect();
        let live_ids: Vec<String> = live.iter().map(|v| v.node_id.clone()).collect();
        let dead_ids: Vec<String> = unreachable.iter().map(|v| v.node_id.clone()).collect();

        let round = GossipRound {
            request: GossipRequest {
                ver: PROTOCOL_VERSION,
                sender: "node-a".to_string(),
                online: None,
                offline: None,
            },
            live,
            unreachable,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let targets = round.pick_targets(&mut rng);

        prop_assert!(targets.len() <= 2);
        for target in &targets {
            prop_assert!(live_ids.contains(target) || dead_ids.contains(target));
        }
        let live_picks = targets.iter().filter(|t| live_ids.contains(*t)).count();
        let dead_picks = targets.iter().filter(|t| dead_ids.contains(*t)).count();
        prop_assert_eq!(live_picks, usize::from(live_count > 0));
        prop_assert!(dead_picks <= 1);
        if dead_count == 0 {
            prop_assert_eq!(dead_picks, 0);
        }
    }
}
