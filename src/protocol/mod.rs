//! # Protocol Layer
//!
//! The control-plane above the transports: typed channel messages, the
//! registry seam toward the service layer, and the [`Transit`] engine that
//! drives membership, liveness, and message routing.
//!
//! ## Components
//! - **Message**: serde payloads for every channel kind
//! - **Registry**: traits the surrounding service layer implements
//! - **Engine**: lifecycle, dispatch, timers, and gossip coordination

pub mod engine;
pub mod message;
pub mod registry;

pub use engine::Transit;
pub use message::{
    DisconnectMessage, DiscoverMessage, ErrorInfo, EventMessage, HeartbeatMessage, HelloMessage,
    NodeInfo, PingMessage, PongMessage, RequestMessage, ResponseMessage, ServiceSpec,
};
pub use registry::{EventSink, ServiceRegistry};
