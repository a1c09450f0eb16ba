#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Gossip convergence tests exercising two membership tables against each other
//! Requests and responses are handed across directly, so every scenario is a
//! deterministic merge with no transport, timers, or randomness involved

use std::sync::Arc;

use mesh_transit::core::PROTOCOL_VERSION;
use mesh_transit::mesh::{GossipEngine, GossipResponse, PeerEvent, PeerTable, PeerUpdate};
use mesh_transit::protocol::{NodeInfo, ServiceSpec};

fn cluster_node(node_id: &str, host: &str, port: u16) -> (Arc<PeerTable>, GossipEngine) {
    let peers = Arc::new(PeerTable::new(node_id, host, port));
    peers.local().activate().unwrap();
    (peers.clone(), GossipEngine::new(peers))
}

fn local_info(peers: &Arc<PeerTable>) -> NodeInfo {
    let view = peers.local().view().unwrap();
    NodeInfo::new(
        view.node_id,
        view.seq,
        view.host,
        view.port,
        vec![ServiceSpec::new("api")],
    )
}

fn peer_info(node_id: &str, seq: u64, host: &str, port: u16) -> NodeInfo {
    NodeInfo::new(node_id, seq, host, port, vec![ServiceSpec::new("db")])
}

// ============================================================================
// PLACEHOLDER CONVERGENCE
// ============================================================================

#[test]
fn test_mentioned_stranger_becomes_placeholder_then_converges() {
    let (peers_a, engine_a) = cluster_node("node-a", "10.0.0.1", 7000);
    let (peers_b, engine_b) = cluster_node("node-b", "10.0.0.2", 7000);

    // a already knows x; b has never heard of a or x
    let mut seeded = Vec::new();
    engine_a
        .apply_info("node-x", &peer_info("node-x", 3, "10.0.0.9", 7009), &mut seeded)
        .unwrap();
    assert_eq!(
        seeded,
        vec![PeerEvent::Connected {
            node_id: "node-x".to_string(),
            reconnected: false,
        }]
    );

    // a's summary reaches b: both strangers become addressless placeholders
    let round_a = engine_a.prepare_round();
    let (reply, events) = engine_b
        .handle_request(&round_a.request, || Ok(local_info(&peers_b)))
        .unwrap();
    assert!(events.is_empty(), "placeholders are born offline, no edges fire");

    let placeholder = peers_b.get("node-x").unwrap().view().unwrap();
    assert!(!placeholder.is_online());
    assert!(!placeholder.has_address());

    // b only knew itself better, so the reply reinstates nothing but node-b
    let reply = reply.expect("b must answer with its own info");
    assert_eq!(reply.online.as_ref().unwrap().len(), 1);
    let a_events = engine_a.handle_response(&reply).unwrap();
    assert_eq!(
        a_events,
        vec![PeerEvent::Connected {
            node_id: "node-b".to_string(),
            reconnected: false,
        }]
    );

    // b's next round claims both placeholders offline at seq 0; a refutes
    // with full info blocks and b converges
    let round_b = engine_b.prepare_round();
    let offline = round_b.request.offline.as_ref().unwrap();
    assert_eq!(offline.get("node-a"), Some(&0));
    assert_eq!(offline.get("node-x"), Some(&0));

    let (reply, events) = engine_a
        .handle_request(&round_b.request, || Ok(local_info(&peers_a)))
        .unwrap();
    assert!(events.is_empty(), "a zero-seq claim never beats a live seq");

    let b_events = engine_b.handle_response(&reply.unwrap()).unwrap();
    assert_eq!(b_events.len(), 2);
    assert!(b_events.iter().all(|e| matches!(e, PeerEvent::Connected { .. })));

    let x = peers_b.get("node-x").unwrap().view().unwrap();
    assert!(x.is_online());
    assert_eq!(x.seq, 3);
    assert_eq!(x.host, "10.0.0.9");
    assert_eq!(x.port, 7009);
    assert!(peers_b.online_ids().contains(&"node-a".to_string()));
}

// ============================================================================
// FALSE SUSPICION AND SELF-DEFENSE
// ============================================================================

#[test]
fn test_false_suspicion_is_refuted_by_a_defended_info() {
    let (peers_a, engine_a) = cluster_node("node-a", "10.0.0.1", 7000);
    let (peers_b, engine_b) = cluster_node("node-b", "10.0.0.2", 7000);

    let seq_a = peers_a.local().seq().unwrap();
    let mut events = Vec::new();
    engine_b
        .apply_info("node-a", &peer_info("node-a", seq_a, "10.0.0.1", 7000), &mut events)
        .unwrap();

    // b wrongly suspects a and starts claiming it offline at a's own seq
    assert!(peers_b.get("node-a").unwrap().mark_offline().unwrap());
    let round_b = engine_b.prepare_round();
    assert_eq!(round_b.request.offline.as_ref().unwrap().get("node-a"), Some(&seq_a));

    // a outbids the claim before building the info it answers with
    let (reply, _) = engine_a
        .handle_request(&round_b.request, || Ok(local_info(&peers_a)))
        .unwrap();
    let defended = peers_a.local().seq().unwrap();
    assert!(defended > seq_a);

    let b_events = engine_b.handle_response(&reply.unwrap()).unwrap();
    assert!(b_events.contains(&PeerEvent::Connected {
        node_id: "node-a".to_string(),
        reconnected: true,
    }));

    let a_at_b = peers_b.get("node-a").unwrap().view().unwrap();
    assert!(a_at_b.is_online());
    assert_eq!(a_at_b.seq, defended);
}

#[test]
fn test_offline_claim_about_self_in_a_response_bumps_the_seq() {
    let (peers_a, engine_a) = cluster_node("node-a", "10.0.0.1", 7000);

    // the claim arrives inside a response this time; defense still fires
    // and no event is emitted for the local node
    let seq_a = peers_a.local().seq().unwrap();
    let reply = GossipResponse {
        ver: PROTOCOL_VERSION,
        sender: "node-b".to_string(),
        online: None,
        offline: Some([("node-a".to_string(), seq_a)].into_iter().collect()),
    };

    let events = engine_a.handle_response(&reply).unwrap();
    assert!(events.is_empty());
    assert_eq!(peers_a.local().seq().unwrap(), seq_a + 1);
}

// ============================================================================
// OFFLINE CLAIMS AND RESTARTS
// ============================================================================

#[test]
fn test_offline_claim_at_equal_seq_is_adopted_once() {
    let (peers_b, engine_b) = cluster_node("node-b", "10.0.0.2", 7000);
    let (_, engine_a) = cluster_node("node-a", "10.0.0.1", 7000);

    let mut events = Vec::new();
    engine_b
        .apply_info("node-x", &peer_info("node-x", 3, "10.0.0.9", 7009), &mut events)
        .unwrap();

    // an offline claim carrying the peer's exact seq wins the tie
    let mut round_a = engine_a.prepare_round();
    round_a.request.offline = Some([("node-x".to_string(), 3u64)].into_iter().collect());

    let (_, events) = engine_b
        .handle_request(&round_a.request, || Ok(local_info(&peers_b)))
        .unwrap();
    assert_eq!(
        events,
        vec![PeerEvent::Disconnected {
            node_id: "node-x".to_string(),
            unexpected: true,
        }]
    );
    assert!(!peers_b.get("node-x").unwrap().is_online().unwrap());

    // redelivery of the same claim is idempotent
    let (_, events) = engine_b
        .handle_request(&round_a.request, || Ok(local_info(&peers_b)))
        .unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_restarted_peer_reinstates_with_a_smaller_seq() {
    let (peers_b, engine_b) = cluster_node("node-b", "10.0.0.2", 7000);

    let mut events = Vec::new();
    engine_b
        .apply_info("node-x", &peer_info("node-x", 7, "10.0.0.9", 7009), &mut events)
        .unwrap();
    peers_b.get("node-x").unwrap().mark_offline().unwrap();

    // a fresh incarnation starts counting from 1 again; the explicit push
    // is the reinstatement path, so the smaller seq is adopted
    events.clear();
    engine_b
        .apply_info("node-x", &peer_info("node-x", 1, "10.0.0.9", 7009), &mut events)
        .unwrap();
    assert_eq!(
        events,
        vec![PeerEvent::Connected {
            node_id: "node-x".to_string(),
            reconnected: true,
        }]
    );

    let x = peers_b.get("node-x").unwrap().view().unwrap();
    assert!(x.is_online());
    assert_eq!(x.seq, 1);
}

// ============================================================================
// CPU SAMPLE PROPAGATION
// ============================================================================

#[test]
fn test_newer_cpu_sample_travels_without_an_info_push() {
    let (peers_a, engine_a) = cluster_node("node-a", "10.0.0.1", 7000);
    let (peers_b, engine_b) = cluster_node("node-b", "10.0.0.2", 7000);

    let mut events = Vec::new();
    let x = peer_info("node-x", 3, "10.0.0.9", 7009);
    engine_a.apply_info("node-x", &x, &mut events).unwrap();
    engine_b.apply_info("node-x", &x, &mut events).unwrap();

    // b already holds a's current info, so the reply carries no info blocks
    let a = local_info(&peers_a);
    engine_b.apply_info("node-a", &a, &mut events).unwrap();

    // a holds the fresher sample for the same incarnation
    peers_a.get("node-x").unwrap().update_cpu(5, 40).unwrap();
    peers_b.get("node-x").unwrap().update_cpu(2, 10).unwrap();

    let round_b = engine_b.prepare_round();
    let (reply, _) = engine_a
        .handle_request(&round_b.request, || Ok(local_info(&peers_a)))
        .unwrap();
    let reply = reply.unwrap();
    assert!(matches!(
        reply.online.as_ref().unwrap().get("node-x"),
        Some(PeerUpdate::Cpu { cpu_seq: 5, cpu: 40 })
    ));

    let events = engine_b.handle_response(&reply).unwrap();
    assert!(events.is_empty(), "a cpu merge is not a membership change");
    let merged = peers_b.get("node-x").unwrap().view().unwrap();
    assert_eq!((merged.cpu_seq, merged.cpu), (5, 40));
    assert_eq!(merged.seq, 3);
}
