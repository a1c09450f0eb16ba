//! # Transport Backends
//!
//! Pluggable delivery layer underneath the protocol engine. A backend moves
//! opaque payloads between nodes; everything above the byte level (channel
//! naming, heartbeats, gossip, dispatch) lives in the engine and is shared
//! by every backend.
//!
//! ## Backends
//! - **Tcp**: brokerless point-to-point sockets with gossip-driven
//!   membership and a lazy outbound connection pool
//! - **Memory**: in-process hub with broker-style broadcast topics, used by
//!   the test suite and embedded multi-node setups
//!
//! ## Contract
//! Backends with real broadcast fan-out report `point_to_point() == false`
//! and carry liveness via HEARTBEAT beacons. Point-to-point backends reject
//! broadcast publishes and rely on gossip instead.

pub mod memory;
pub mod tcp;

pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpTransport;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::channel::{Channel, ChannelKind};
use crate::error::Result;
use crate::mesh::table::PeerTable;

/// Callbacks from a backend into the protocol engine. Implementations must
/// tolerate duplicated and reordered deliveries.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// A payload arrived on one of the subscribed channels.
    async fn received(&self, kind: ChannelKind, payload: Bytes);

    /// An addressed send was accepted earlier but could not be delivered.
    /// The engine marks the peer suspect and answers pending requests.
    async fn delivery_failed(&self, node_id: &str, kind: ChannelKind, payload: Bytes);
}

/// One delivery backend. All methods are callable concurrently.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Bind local resources and start feeding `handler`. Point-to-point
    /// backends resolve dial addresses through `peers`; broker backends
    /// may ignore it.
    async fn connect(&self, handler: Arc<dyn InboundHandler>, peers: Arc<PeerTable>)
        -> Result<()>;

    /// Stop all IO. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Register interest in a channel. Called only on backends with
    /// broker-style fan-out; point-to-point backends may reject it.
    async fn subscribe(&self, channel: &Channel) -> Result<()>;

    /// Deliver one payload to a channel. Addressed channels reach exactly
    /// one node; broadcast channels reach every subscriber.
    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()>;

    /// Tear down pooled connections to a peer that was marked offline.
    async fn drop_peer(&self, node_id: &str);

    /// Liveness style: HEARTBEAT beacons (true) or gossip (false).
    fn uses_heartbeat(&self) -> bool;

    /// True when the backend has no broadcast fan-out.
    fn point_to_point(&self) -> bool;

    /// Actually bound data port, once connected. `None` for backends
    /// without a socket address.
    fn local_port(&self) -> Option<u16>;
}
