//! # Mesh Transit
//!
//! Transport and membership layer for a distributed service framework:
//! nodes announce versioned service descriptors, watch each other's
//! liveness, and exchange events, requests, and latency probes over a
//! pluggable delivery backend.
//!
//! ## Layers
//! - **`core`**: packet framing, the stream codec, channel naming, and
//!   pluggable payload serialization
//! - **`mesh`**: per-peer descriptor state machines, the concurrent peer
//!   table, the gossip exchange, and UDP multicast discovery
//! - **`protocol`**: typed control messages, the registry seam toward the
//!   service layer, and the [`Transit`] engine itself
//! - **`transport`**: delivery backends (brokerless TCP, in-process hub)
//! - **`config`** / **`error`** / **`utils`**: the surrounding plumbing
//!
//! ## Backend modes
//!
//! Broker-style backends fan broadcasts out to topic subscribers and carry
//! liveness via HEARTBEAT beacons. The TCP backend has no broadcast at
//! all: membership state spreads through periodic gossip rounds, offline
//! suspicion included, and fresh peers are found by UDP multicast hellos
//! or static seed URLs.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mesh_transit::config::TransitConfig;
//! use mesh_transit::protocol::{
//!     EventMessage, EventSink, PongMessage, RequestMessage, ResponseMessage, ServiceRegistry,
//!     ServiceSpec, Transit,
//! };
//! use mesh_transit::transport::TcpTransport;
//!
//! struct Registry;
//!
//! impl ServiceRegistry for Registry {
//!     fn local_services(&self) -> Vec<ServiceSpec> {
//!         vec![ServiceSpec::new("math").with_actions(&["math.add"])]
//!     }
//!     fn add_actions(&self, _node_id: &str, _services: &[ServiceSpec]) {}
//!     fn remove_actions(&self, _node_id: &str) {}
//!     fn receive_request(&self, _request: RequestMessage) {}
//!     fn receive_response(&self, _response: ResponseMessage) {}
//!     fn receive_pong(&self, _pong: PongMessage) {}
//! }
//!
//! struct Sink;
//!
//! impl EventSink for Sink {
//!     fn receive_event(&self, _event: EventMessage) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransitConfig::from_file("transit.toml")?;
//!     let transport = Arc::new(TcpTransport::new(&config)?);
//!     let transit = Transit::new(&config, transport, Arc::new(Registry), Arc::new(Sink))?;
//!
//!     transit.connect().await?;
//!     let event = EventMessage::new(transit.node_id(), "user.created", b"{}".to_vec(), true);
//!     transit.broadcast_event(&event).await?;
//!     transit.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod mesh;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::TransitConfig;
pub use error::{Result, TransitError};
pub use mesh::PeerEvent;
pub use protocol::Transit;
pub use transport::{MemoryHub, MemoryTransport, TcpTransport, Transport};
