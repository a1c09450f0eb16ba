//! # Gossip Engine
//!
//! Anti-entropy membership exchange for the point-to-point backend. Each
//! round summarizes every known peer, sends the summary to one live peer
//! (and, with growing probability, one unreachable peer), and merges
//! whatever comes back. Loss, duplication, and reordering are all tolerated
//! because every merge is a seq/cpu_seq comparison; there is no coordinator
//! and no round ordering.
//!
//! The wire shapes follow the frame payloads of GOSSIP_REQ and GOSSIP_RSP;
//! the variable-arity entries of the ancestor protocol are explicit typed
//! variants here ([`PeerUpdate`]), which removes a whole class of
//! malformed-message bugs.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::PROTOCOL_VERSION;
use crate::error::Result;
use crate::mesh::descriptor::{DescriptorView, OnlineTransition};
use crate::mesh::table::PeerTable;
use crate::mesh::PeerEvent;
use crate::protocol::message::NodeInfo;

/// Compact claim about one online peer inside a gossip request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub seq: u64,
    pub cpu_seq: u64,
    pub cpu: u8,
}

/// One correction inside a gossip response's online block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerUpdate {
    /// Full info push (the only thing that can reinstate an offline peer).
    Info(NodeInfo),
    /// The info versions matched but our cpu sample was newer.
    Cpu { cpu_seq: u64, cpu: u8 },
    /// Full info push plus a newer cpu sample.
    InfoAndCpu {
        info: NodeInfo,
        cpu_seq: u64,
        cpu: u8,
    },
}

/// Membership summary sent each round. Blocks are `None` when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipRequest {
    pub ver: u8,
    pub sender: String,
    pub online: Option<BTreeMap<String, PeerSummary>>,
    pub offline: Option<BTreeMap<String, u64>>,
}

impl GossipRequest {
    fn claimed_online(&self, node_id: &str) -> Option<&PeerSummary> {
        self.online.as_ref().and_then(|m| m.get(node_id))
    }

    fn claimed_offline(&self, node_id: &str) -> Option<u64> {
        self.offline.as_ref().and_then(|m| m.get(node_id)).copied()
    }

    /// Node ids this request mentions in either block.
    fn mentioned(&self) -> impl Iterator<Item = &String> {
        self.online
            .iter()
            .flat_map(|m| m.keys())
            .chain(self.offline.iter().flat_map(|m| m.keys()))
    }
}

/// Corrections answered to a gossip request. Terminal: never replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipResponse {
    pub ver: u8,
    pub sender: String,
    pub online: Option<BTreeMap<String, PeerUpdate>>,
    pub offline: Option<BTreeMap<String, u64>>,
}

impl GossipResponse {
    pub fn is_empty(&self) -> bool {
        self.online.is_none() && self.offline.is_none()
    }
}

/// Everything one round needs: the outbound summary plus the endpoint
/// partition it was computed from.
#[derive(Debug)]
pub struct GossipRound {
    pub request: GossipRequest,
    pub live: Vec<DescriptorView>,
    pub unreachable: Vec<DescriptorView>,
}

impl GossipRound {
    /// Pick this round's targets: one live endpoint uniformly, plus one
    /// unreachable endpoint with probability `unreachable / (live + 1)`.
    /// The ratio is unclamped: at one and above the unreachable branch
    /// always fires, biasing effort toward re-discovering mostly-dead
    /// clusters.
    pub fn pick_targets<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut targets = Vec::with_capacity(2);
        if let Some(live) = self.live.choose(rng) {
            targets.push(live.node_id.clone());
        }
        if !self.unreachable.is_empty() {
            let ratio = self.unreachable.len() as f64 / (self.live.len() as f64 + 1.0);
            if rng.random::<f64>() < ratio {
                if let Some(dead) = self.unreachable.choose(rng) {
                    targets.push(dead.node_id.clone());
                }
            }
        }
        targets
    }
}

/// Merge logic over the shared [`PeerTable`]. The protocol engine drives
/// the timer and the wire; everything here is synchronous table surgery.
#[derive(Debug)]
pub struct GossipEngine {
    peers: Arc<PeerTable>,
}

impl GossipEngine {
    pub fn new(peers: Arc<PeerTable>) -> Self {
        Self { peers }
    }

    /// Build this round's summary of every known peer (self included) and
    /// partition the rest into live/unreachable endpoint candidates.
    pub fn prepare_round(&self) -> GossipRound {
        let mut online = BTreeMap::new();
        let mut offline = BTreeMap::new();
        let mut live = Vec::new();
        let mut unreachable = Vec::new();

        for view in self.peers.views() {
            if view.is_online() {
                online.insert(
                    view.node_id.clone(),
                    PeerSummary {
                        seq: view.seq,
                        cpu_seq: view.cpu_seq,
                        cpu: view.cpu,
                    },
                );
                if !view.local && view.has_address() {
                    live.push(view);
                }
            } else {
                offline.insert(view.node_id.clone(), view.seq);
                if view.has_address() {
                    unreachable.push(view);
                }
            }
        }

        GossipRound {
            request: GossipRequest {
                ver: PROTOCOL_VERSION,
                sender: self.peers.local_id().to_string(),
                online: nonempty(online),
                offline: nonempty(offline),
            },
            live,
            unreachable,
        }
    }

    /// Merge a peer's summary into the table and build the corrections we
    /// know better. `local_info` supplies a fresh local info block when the
    /// response has to carry one (it is built after any self-defense bump,
    /// so a defended seq is already inside).
    pub fn handle_request<F>(
        &self,
        request: &GossipRequest,
        local_info: F,
    ) -> Result<(Option<GossipResponse>, Vec<PeerEvent>)>
    where
        F: Fn() -> Result<NodeInfo>,
    {
        let local_id = self.peers.local_id().to_string();
        let mut events = Vec::new();

        // unknown peers mentioned by the requester become placeholders;
        // their addresses arrive later via info pushes or hellos
        for node_id in request.mentioned() {
            if !self.peers.contains(node_id) {
                debug!(node_id, "gossip mentioned an unknown peer");
                self.peers.ensure(node_id, "", 0)?;
            }
        }

        let mut online = BTreeMap::new();
        let mut offline = BTreeMap::new();

        for descriptor in self.peers.snapshot() {
            let node_id = descriptor.node_id().to_string();
            let claimed_online = request.claimed_online(&node_id);
            let claimed_offline = request.claimed_offline(&node_id);

            // apply the requester's claim first
            if let Some(claimed_seq) = claimed_offline {
                if node_id == local_id {
                    let view = descriptor.view()?;
                    if claimed_seq >= view.seq {
                        let seq = descriptor.defend_seq(claimed_seq)?;
                        info!(claimed_seq, seq, "defending against false offline claim");
                    }
                } else if descriptor.mark_offline_with_seq(claimed_seq)? {
                    events.push(PeerEvent::Disconnected {
                        node_id: node_id.clone(),
                        unexpected: true,
                    });
                }
            } else if let Some(claim) = claimed_online {
                // a bare online claim carries no info, so a newer seq can't
                // be adopted here; only a newer cpu sample merges, and only
                // while we also believe the peer is online
                if node_id != local_id && descriptor.is_online()? {
                    descriptor.update_cpu(claim.cpu_seq, claim.cpu)?;
                }
            }

            // then answer whatever we still know better
            let view = descriptor.view()?;
            let claimed_seq = claimed_offline
                .or(claimed_online.map(|c| c.seq))
                .unwrap_or(0);

            if view.is_online() {
                if view.seq > claimed_seq && view.seq > 0 {
                    let info = if view.local {
                        local_info()?
                    } else {
                        match descriptor.info()? {
                            Some(info) => info,
                            None => {
                                warn!(node_id, "online descriptor without info, skipping");
                                continue;
                            }
                        }
                    };
                    let cpu_newer = claimed_online.map_or(true, |c| view.cpu_seq > c.cpu_seq);
                    let update = if cpu_newer && view.cpu_seq > 0 {
                        PeerUpdate::InfoAndCpu {
                            info,
                            cpu_seq: view.cpu_seq,
                            cpu: view.cpu,
                        }
                    } else {
                        PeerUpdate::Info(info)
                    };
                    online.insert(node_id, update);
                } else if let Some(claim) = claimed_online {
                    if view.seq == claim.seq && view.cpu_seq > claim.cpu_seq {
                        online.insert(
                            node_id,
                            PeerUpdate::Cpu {
                                cpu_seq: view.cpu_seq,
                                cpu: view.cpu,
                            },
                        );
                    }
                }
            } else if view.seq > claimed_seq {
                offline.insert(node_id, view.seq);
            }
        }

        let response = match (nonempty(online), nonempty(offline)) {
            (None, None) => None,
            (online, offline) => Some(GossipResponse {
                ver: PROTOCOL_VERSION,
                sender: local_id,
                online,
                offline,
            }),
        };
        Ok((response, events))
    }

    /// Merge the corrections a peer sent back. Terminal: nothing is sent.
    pub fn handle_response(&self, response: &GossipResponse) -> Result<Vec<PeerEvent>> {
        let local_id = self.peers.local_id().to_string();
        let mut events = Vec::new();

        if let Some(online) = &response.online {
            for (node_id, update) in online {
                if *node_id == local_id {
                    continue;
                }
                match update {
                    PeerUpdate::Info(info) => {
                        self.apply_info(node_id, info, &mut events)?;
                    }
                    PeerUpdate::InfoAndCpu { info, cpu_seq, cpu } => {
                        self.apply_info(node_id, info, &mut events)?;
                        if let Some(descriptor) = self.peers.get(node_id) {
                            descriptor.update_cpu(*cpu_seq, *cpu)?;
                        }
                    }
                    PeerUpdate::Cpu { cpu_seq, cpu } => {
                        if let Some(descriptor) = self.peers.get(node_id) {
                            descriptor.update_cpu(*cpu_seq, *cpu)?;
                        }
                    }
                }
            }
        }

        if let Some(offline) = &response.offline {
            for (node_id, seq) in offline {
                if *node_id == local_id {
                    let local = self.peers.local();
                    if *seq >= local.seq()? {
                        let new_seq = local.defend_seq(*seq)?;
                        info!(
                            claimed_seq = seq,
                            seq = new_seq,
                            "defending against false offline claim"
                        );
                    }
                    continue;
                }
                let descriptor = self.peers.ensure(node_id, "", 0)?;
                if descriptor.mark_offline_with_seq(*seq)? {
                    events.push(PeerEvent::Disconnected {
                        node_id: node_id.clone(),
                        unexpected: true,
                    });
                }
            }
        }

        Ok(events)
    }

    /// Shared info-push application for gossip responses and INFO packets.
    pub fn apply_info(
        &self,
        node_id: &str,
        info: &NodeInfo,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        if info.sender != node_id {
            warn!(
                node_id,
                sender = %info.sender,
                "info block sender mismatch, entry skipped"
            );
            return Ok(());
        }
        let descriptor = self.peers.ensure(node_id, &info.host, info.port)?;
        match descriptor.mark_online(info.clone())? {
            OnlineTransition::Connected => events.push(PeerEvent::Connected {
                node_id: node_id.to_string(),
                reconnected: false,
            }),
            OnlineTransition::Reconnected => events.push(PeerEvent::Connected {
                node_id: node_id.to_string(),
                reconnected: true,
            }),
            OnlineTransition::Updated => events.push(PeerEvent::Updated {
                node_id: node_id.to_string(),
            }),
            OnlineTransition::Unchanged => {}
        }
        Ok(())
    }
}

fn nonempty<T>(map: BTreeMap<String, T>) -> Option<BTreeMap<String, T>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::protocol::message::ServiceSpec;

    fn engine_with_local(seq_activated: bool) -> (Arc<PeerTable>, GossipEngine) {
        let peers = Arc::new(PeerTable::new("local", "127.0.0.1", 7000));
        if seq_activated {
            peers.local().activate().unwrap();
        }
        (peers.clone(), GossipEngine::new(peers))
    }

    fn local_info(peers: &Arc<PeerTable>) -> NodeInfo {
        NodeInfo::new(
            "local",
            peers.local().seq().unwrap(),
            "127.0.0.1",
            7000,
            vec![ServiceSpec::new("api")],
        )
    }

    fn peer_info(node_id: &str, seq: u64) -> NodeInfo {
        NodeInfo::new(node_id, seq, "10.0.0.5", 7000, vec![ServiceSpec::new("db")])
    }

    #[test]
    fn round_summarizes_everyone_including_self() {
        let (peers, engine) = engine_with_local(true);
        let online_peer = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        online_peer.mark_online(peer_info("up", 3)).unwrap();
        peers.ensure("down", "10.0.0.6", 7000).unwrap();

        let round = engine.prepare_round();
        let online = round.request.online.as_ref().unwrap();
        let offline = round.request.offline.as_ref().unwrap();

        assert_eq!(online.get("local").unwrap().seq, 1);
        assert_eq!(online.get("up").unwrap().seq, 3);
        assert_eq!(offline.get("down").copied(), Some(0));

        assert_eq!(round.live.len(), 1);
        assert_eq!(round.unreachable.len(), 1);
    }

    #[test]
    fn placeholders_without_address_are_never_endpoints() {
        let (peers, engine) = engine_with_local(true);
        peers.ensure("ghost", "", 0).unwrap();

        let round = engine.prepare_round();
        assert!(round.unreachable.is_empty());
        assert_eq!(round.request.offline.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn stale_online_claim_is_answered_with_full_info() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("up", 5)).unwrap();
        d.update_cpu(2, 30).unwrap();

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: Some(
                [(
                    "up".to_string(),
                    PeerSummary {
                        seq: 3,
                        cpu_seq: 1,
                        cpu: 10,
                    },
                )]
                .into(),
            ),
            offline: None,
        };

        let (response, events) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert!(events.is_empty());
        let response = response.unwrap();
        let online = response.online.unwrap();

        match online.get("up").unwrap() {
            PeerUpdate::InfoAndCpu { info, cpu_seq, cpu } => {
                assert_eq!(info.seq, 5);
                assert_eq!((*cpu_seq, *cpu), (2, 30));
            }
            other => panic!("expected InfoAndCpu, got {other:?}"),
        }
        // the requester never mentioned us, so our own info goes out too
        assert!(online.contains_key("local"));
    }

    #[test]
    fn equal_seq_newer_cpu_sends_cpu_delta_only() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("up", 5)).unwrap();
        d.update_cpu(4, 61).unwrap();

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: Some(
                [
                    (
                        "up".to_string(),
                        PeerSummary {
                            seq: 5,
                            cpu_seq: 2,
                            cpu: 12,
                        },
                    ),
                    (
                        "local".to_string(),
                        PeerSummary {
                            seq: 1,
                            cpu_seq: 0,
                            cpu: 0,
                        },
                    ),
                ]
                .into(),
            ),
            offline: None,
        };

        let (response, _) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        let online = response.unwrap().online.unwrap();
        assert_eq!(
            online.get("up").unwrap(),
            &PeerUpdate::Cpu {
                cpu_seq: 4,
                cpu: 61
            }
        );
        assert!(!online.contains_key("local"));
    }

    #[test]
    fn offline_claim_takes_down_an_online_peer_once() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("up", 5)).unwrap();

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: None,
            offline: Some([("up".to_string(), 5u64)].into()),
        };

        let (_, events) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert_eq!(
            events,
            vec![PeerEvent::Disconnected {
                node_id: "up".into(),
                unexpected: true
            }]
        );

        // re-delivery is idempotent
        let (_, events) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert!(events.is_empty());
        assert!(!d.is_online().unwrap());
    }

    #[test]
    fn stale_offline_claim_is_refuted_with_info() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("up", 9)).unwrap();

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: None,
            offline: Some([("up".to_string(), 4u64)].into()),
        };

        let (response, events) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert!(events.is_empty());
        assert!(d.is_online().unwrap());

        match response.unwrap().online.unwrap().get("up").unwrap() {
            PeerUpdate::Info(info) | PeerUpdate::InfoAndCpu { info, .. } => {
                assert_eq!(info.seq, 9)
            }
            other => panic!("expected info push, got {other:?}"),
        }
    }

    #[test]
    fn self_defense_bumps_past_the_claim_and_reports_online() {
        let (peers, engine) = engine_with_local(true);

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: None,
            offline: Some([("local".to_string(), 41u64)].into()),
        };

        let (response, events) = engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(peers.local().seq().unwrap(), 42);
        assert!(peers.local().is_online().unwrap());

        match response.unwrap().online.unwrap().get("local").unwrap() {
            PeerUpdate::Info(info) | PeerUpdate::InfoAndCpu { info, .. } => {
                assert_eq!(info.seq, 42)
            }
            other => panic!("expected info push, got {other:?}"),
        }
    }

    #[test]
    fn self_defense_on_response_only_bumps() {
        let (peers, engine) = engine_with_local(true);

        let response = GossipResponse {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: None,
            offline: Some([("local".to_string(), 7u64)].into()),
        };

        let events = engine.handle_response(&response).unwrap();
        assert!(events.is_empty());
        assert_eq!(peers.local().seq().unwrap(), 8);
        assert!(peers.local().is_online().unwrap());
    }

    #[test]
    fn online_claims_never_reinstate_an_offline_peer() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("flappy", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("flappy", 2)).unwrap();
        d.mark_offline().unwrap();

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: Some(
                [(
                    "flappy".to_string(),
                    PeerSummary {
                        seq: 2,
                        cpu_seq: 9,
                        cpu: 50,
                    },
                )]
                .into(),
            ),
            offline: None,
        };

        engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        assert!(!d.is_online().unwrap());
        // the cpu claim was ignored too
        assert_eq!(d.view().unwrap().cpu_seq, 0);
    }

    #[test]
    fn response_info_push_reinstates() {
        let (peers, engine) = engine_with_local(true);
        let d = peers.ensure("up", "10.0.0.5", 7000).unwrap();
        d.mark_online(peer_info("up", 2)).unwrap();
        d.mark_offline().unwrap();

        let response = GossipResponse {
            ver: PROTOCOL_VERSION,
            sender: "up".into(),
            online: Some([("up".to_string(), PeerUpdate::Info(peer_info("up", 3)))].into()),
            offline: None,
        };

        let events = engine.handle_response(&response).unwrap();
        assert_eq!(
            events,
            vec![PeerEvent::Connected {
                node_id: "up".into(),
                reconnected: true
            }]
        );
        assert!(d.is_online().unwrap());
    }

    #[test]
    fn mismatched_info_sender_is_skipped() {
        let (peers, engine) = engine_with_local(true);

        let response = GossipResponse {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: Some([("spoofed".to_string(), PeerUpdate::Info(peer_info("up", 3)))].into()),
            offline: None,
        };

        let events = engine.handle_response(&response).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn gossip_mentions_create_placeholders() {
        let (peers, engine) = engine_with_local(true);

        let request = GossipRequest {
            ver: PROTOCOL_VERSION,
            sender: "remote".into(),
            online: Some(
                [(
                    "stranger".to_string(),
                    PeerSummary {
                        seq: 4,
                        cpu_seq: 1,
                        cpu: 5,
                    },
                )]
                .into(),
            ),
            offline: None,
        };

        engine
            .handle_request(&request, || Ok(local_info(&peers)))
            .unwrap();
        let ghost = peers.get("stranger").unwrap();
        assert!(!ghost.is_online().unwrap());
        assert!(!ghost.view().unwrap().has_address());
    }

    #[test]
    fn idempotent_under_redelivery() {
        let (peers, engine) = engine_with_local(true);
        peers.ensure("up", "10.0.0.5", 7000).unwrap();

        let response = GossipResponse {
            ver: PROTOCOL_VERSION,
            sender: "up".into(),
            online: Some(
                [(
                    "up".to_string(),
                    PeerUpdate::InfoAndCpu {
                        info: peer_info("up", 6),
                        cpu_seq: 3,
                        cpu: 20,
                    },
                )]
                .into(),
            ),
            offline: Some([("gone".to_string(), 2u64)].into()),
        };

        let first = engine.handle_response(&response).unwrap();
        let snapshot: Vec<_> = {
            let mut views = peers.views();
            views.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            views
        };

        let second = engine.handle_response(&response).unwrap();
        let mut replayed = peers.views();
        replayed.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        // "gone" was never seen online, so only the connect edge fires
        assert_eq!(
            first,
            vec![PeerEvent::Connected {
                node_id: "up".into(),
                reconnected: false
            }]
        );
        assert!(second.is_empty());
        // offline_since timestamps survive the replay untouched
        assert_eq!(snapshot, replayed);
    }
}
