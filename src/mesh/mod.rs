//! # Mesh Membership
//!
//! Decentralized membership for the point-to-point backend: who is in the
//! cluster, which incarnation of them is current, and whether they are
//! reachable right now.
//!
//! ## Components
//! - **Descriptor**: Per-peer versioned state machine (seq / cpu_seq)
//! - **Table**: Concurrent node_id to descriptor map with seed bootstrap
//! - **Gossip**: Anti-entropy summary/correction exchange
//! - **Locator**: UDP multicast hello beacon for zero-config discovery
//!
//! ## Consistency
//! Membership is eventually consistent. Every mutation is a versioned
//! compare-and-adopt, so packets may be lost, duplicated, or reordered
//! without corrupting the table; convergence only needs some pair of nodes
//! to gossip eventually.

pub mod descriptor;
pub mod gossip;
pub mod locator;
pub mod table;

pub use descriptor::{DescriptorView, NodeDescriptor, OnlineTransition};
pub use gossip::{GossipEngine, GossipRequest, GossipResponse, GossipRound, PeerSummary, PeerUpdate};
pub use locator::UdpLocator;
pub use table::{PeerTable, SeedPeer};

/// Membership change observed by the local node, emitted strictly after the
/// descriptor lock that produced it was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer came online (`reconnected` when it was known before).
    Connected { node_id: String, reconnected: bool },
    /// An online peer pushed newer info with a changed service list.
    Updated { node_id: String },
    /// A peer went offline (`unexpected` unless it said goodbye first).
    Disconnected { node_id: String, unexpected: bool },
}

impl PeerEvent {
    pub fn node_id(&self) -> &str {
        match self {
            PeerEvent::Connected { node_id, .. }
            | PeerEvent::Updated { node_id }
            | PeerEvent::Disconnected { node_id, .. } => node_id,
        }
    }
}
