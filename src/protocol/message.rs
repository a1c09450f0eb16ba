//! # Control Messages
//!
//! Typed payloads for every channel kind. Each message carries the protocol
//! version and the sender's node id; application payloads (`data`/`params`)
//! stay opaque bytes owned by the registry's own codec.

use serde::{Deserialize, Serialize};

use crate::core::PROTOCOL_VERSION;

/// Full descriptor payload broadcast on INFO and carried inside gossip
/// responses. `seq` versions the whole block: any change to the exposed
/// services bumps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub ver: u8,
    pub sender: String,
    pub seq: u64,
    pub host: String,
    pub port: u16,
    pub client: ClientInfo,
    pub services: Vec<ServiceSpec>,
}

impl NodeInfo {
    pub fn new(
        sender: impl Into<String>,
        seq: u64,
        host: impl Into<String>,
        port: u16,
        services: Vec<ServiceSpec>,
    ) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            seq,
            host: host.into(),
            port,
            client: ClientInfo::default(),
            services,
        }
    }
}

/// Implementation self-description attached to every INFO block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub kind: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            kind: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One exposed service: its name plus the action/event names it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|e| e.to_string()).collect();
        self
    }
}

/// Broker-backend liveness beacon carrying the sender's cpu load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub ver: u8,
    pub sender: String,
    pub cpu: u8,
}

impl HeartbeatMessage {
    pub fn new(sender: impl Into<String>, cpu: u8) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            cpu,
        }
    }
}

/// Asks the receiver to answer with its INFO block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverMessage {
    pub ver: u8,
    pub sender: String,
}

impl DiscoverMessage {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
        }
    }
}

/// Announces an orderly shutdown (offline by statement, not by timeout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectMessage {
    pub ver: u8,
    pub sender: String,
}

impl DisconnectMessage {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
        }
    }
}

/// Latency probe. `time` is the sender's epoch-millis send timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub ver: u8,
    pub sender: String,
    pub id: u64,
    pub time: u64,
}

impl PingMessage {
    pub fn new(sender: impl Into<String>, id: u64, time: u64) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            id,
            time,
        }
    }
}

/// Latency probe answer. Carries three timestamps: the ping's send time,
/// the remote arrival time, and the local receipt time stamped by the
/// original pinger just before relaying to the registry. Enough for both
/// round-trip and clock-offset estimates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMessage {
    pub ver: u8,
    pub sender: String,
    pub id: u64,
    pub time: u64,
    pub arrived: u64,
    #[serde(default)]
    pub received: u64,
}

impl PongMessage {
    /// Build the answer to `ping`, stamped with the remote arrival time.
    pub fn answering(ping: &PingMessage, sender: impl Into<String>, arrived: u64) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            id: ping.id,
            time: ping.time,
            arrived,
            received: 0,
        }
    }
}

/// Discovery hello: sent over UDP multicast and as the first frame on every
/// fresh outbound TCP connection, so the receiver learns the advertised
/// address of an otherwise unknown peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub ver: u8,
    pub sender: String,
    pub host: String,
    pub port: u16,
}

impl HelloMessage {
    pub fn new(sender: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            host: host.into(),
            port,
        }
    }
}

/// Fire-and-forget event emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    pub ver: u8,
    pub sender: String,
    pub event: String,
    pub data: Vec<u8>,
    pub broadcast: bool,
}

impl EventMessage {
    pub fn new(
        sender: impl Into<String>,
        event: impl Into<String>,
        data: Vec<u8>,
        broadcast: bool,
    ) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            event: event.into(),
            data,
            broadcast,
        }
    }
}

/// Action invocation addressed to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub ver: u8,
    pub sender: String,
    pub id: String,
    pub action: String,
    pub params: Vec<u8>,
}

impl RequestMessage {
    pub fn new(
        sender: impl Into<String>,
        id: impl Into<String>,
        action: impl Into<String>,
        params: Vec<u8>,
    ) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            id: id.into(),
            action: action.into(),
            params,
        }
    }
}

/// Answer to a [`RequestMessage`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub ver: u8,
    pub sender: String,
    pub id: String,
    pub success: bool,
    pub data: Vec<u8>,
    pub error: Option<ErrorInfo>,
}

impl ResponseMessage {
    pub fn success(sender: impl Into<String>, id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            id: id.into(),
            success: true,
            data,
            error: None,
        }
    }

    /// Failure answer; also synthesized locally when an addressed request
    /// could not be delivered, so in-flight calls fail fast.
    pub fn failure(sender: impl Into<String>, id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            sender: sender.into(),
            id: id.into(),
            success: false,
            data: Vec::new(),
            error: Some(error),
        }
    }
}

/// Structured error attached to failure responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub retryable: bool,
}

impl ErrorInfo {
    pub fn unreachable(node_id: &str) -> Self {
        Self {
            name: "NodeUnreachable".to_string(),
            message: format!("node {node_id} is not reachable"),
            retryable: true,
        }
    }
}
