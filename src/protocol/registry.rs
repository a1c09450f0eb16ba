//! # Registry Seams
//!
//! The engine owns membership and byte movement; what the cluster *does*
//! with calls and events lives behind these two traits. The host wires in
//! its action registry and event bus when constructing the engine.
//!
//! All methods are synchronous and must not block: implementations hand
//! heavy work to their own executors.

use crate::protocol::message::{
    EventMessage, PongMessage, RequestMessage, ResponseMessage, ServiceSpec,
};

/// Action registry collaborator. The engine keeps it aligned with the peer
/// table: remote actions appear when a node comes online, disappear when it
/// goes offline, and every in-flight call gets exactly one response.
pub trait ServiceRegistry: Send + Sync {
    /// Services this node exposes; embedded in every outgoing info block.
    fn local_services(&self) -> Vec<ServiceSpec>;

    /// A remote node came online or changed its service list.
    fn add_actions(&self, node_id: &str, services: &[ServiceSpec]);

    /// A remote node went offline; drop its cached actions.
    fn remove_actions(&self, node_id: &str);

    /// An incoming call addressed to a local action. The registry answers
    /// through the engine's response path, correlated by `request.id`.
    fn receive_request(&self, request: RequestMessage);

    /// The answer to a call this node issued, or a synthesized failure when
    /// delivery broke underneath it.
    fn receive_response(&self, response: ResponseMessage);

    /// A latency probe answer, already stamped with the local receive time.
    fn receive_pong(&self, pong: PongMessage);
}

/// Event bus collaborator.
pub trait EventSink: Send + Sync {
    /// A remote emission addressed or broadcast to this node.
    fn receive_event(&self, event: EventMessage);
}
