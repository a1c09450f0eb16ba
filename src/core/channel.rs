//! # Channel Naming
//!
//! Logical channels shared by every backend, named
//! `{prefix}.{KIND}` (broadcast) or `{prefix}.{KIND}.{nodeID}` (addressed).
//!
//! Broker backends subscribe to these names as topics; the point-to-point
//! TCP backend never materializes them, mapping the kind straight to a wire
//! [`PacketKind`] and the node id to a pooled socket. Node ids may contain
//! dots, so parsing splits on the first dot after the kind token only.

use serde::{Deserialize, Serialize};

use crate::core::packet::PacketKind;
use crate::error::{Result, TransitError};

/// Logical kind of a channel.
///
/// The first nine exist on every backend; the three gossip kinds are
/// produced by the TCP backend only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Event,
    Request,
    Response,
    Discover,
    Info,
    Disconnect,
    Heartbeat,
    Ping,
    Pong,
    GossipRequest,
    GossipResponse,
    GossipHello,
}

impl ChannelKind {
    /// Token used inside channel names.
    pub fn token(self) -> &'static str {
        match self {
            ChannelKind::Event => "EVENT",
            ChannelKind::Request => "REQ",
            ChannelKind::Response => "RES",
            ChannelKind::Discover => "DISCOVER",
            ChannelKind::Info => "INFO",
            ChannelKind::Disconnect => "DISCONNECT",
            ChannelKind::Heartbeat => "HEARTBEAT",
            ChannelKind::Ping => "PING",
            ChannelKind::Pong => "PONG",
            ChannelKind::GossipRequest => "GOSSIP_REQ",
            ChannelKind::GossipResponse => "GOSSIP_RSP",
            ChannelKind::GossipHello => "GOSSIP_HELLO",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "EVENT" => Some(ChannelKind::Event),
            "REQ" => Some(ChannelKind::Request),
            "RES" => Some(ChannelKind::Response),
            "DISCOVER" => Some(ChannelKind::Discover),
            "INFO" => Some(ChannelKind::Info),
            "DISCONNECT" => Some(ChannelKind::Disconnect),
            "HEARTBEAT" => Some(ChannelKind::Heartbeat),
            "PING" => Some(ChannelKind::Ping),
            "PONG" => Some(ChannelKind::Pong),
            "GOSSIP_REQ" => Some(ChannelKind::GossipRequest),
            "GOSSIP_RSP" => Some(ChannelKind::GossipResponse),
            "GOSSIP_HELLO" => Some(ChannelKind::GossipHello),
            _ => None,
        }
    }

    /// Wire packet kind for point-to-point delivery; `None` for the
    /// broker-only control kinds (DISCOVER/INFO/DISCONNECT/HEARTBEAT).
    pub fn packet_kind(self) -> Option<PacketKind> {
        match self {
            ChannelKind::Event => Some(PacketKind::Event),
            ChannelKind::Request => Some(PacketKind::Request),
            ChannelKind::Response => Some(PacketKind::Response),
            ChannelKind::Ping => Some(PacketKind::Ping),
            ChannelKind::Pong => Some(PacketKind::Pong),
            ChannelKind::GossipRequest => Some(PacketKind::GossipRequest),
            ChannelKind::GossipResponse => Some(PacketKind::GossipResponse),
            ChannelKind::GossipHello => Some(PacketKind::GossipHello),
            _ => None,
        }
    }

    pub fn from_packet(kind: PacketKind) -> Self {
        match kind {
            PacketKind::Event => ChannelKind::Event,
            PacketKind::Request => ChannelKind::Request,
            PacketKind::Response => ChannelKind::Response,
            PacketKind::Ping => ChannelKind::Ping,
            PacketKind::Pong => ChannelKind::Pong,
            PacketKind::GossipRequest => ChannelKind::GossipRequest,
            PacketKind::GossipResponse => ChannelKind::GossipResponse,
            PacketKind::GossipHello => ChannelKind::GossipHello,
        }
    }
}

/// A channel: kind plus optional destination node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub kind: ChannelKind,
    pub node_id: Option<String>,
}

impl Channel {
    pub fn broadcast(kind: ChannelKind) -> Self {
        Self {
            kind,
            node_id: None,
        }
    }

    pub fn to(kind: ChannelKind, node_id: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node_id.into()),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.node_id.is_none()
    }

    /// Topic name under the given prefix.
    pub fn render(&self, prefix: &str) -> String {
        match &self.node_id {
            Some(node_id) => format!("{prefix}.{}.{node_id}", self.kind.token()),
            None => format!("{prefix}.{}", self.kind.token()),
        }
    }

    /// Parse a topic name back into a channel. Everything after the kind
    /// token is the node id, dots included.
    pub fn parse(prefix: &str, name: &str) -> Result<Self> {
        let rest = name
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('.'))
            .ok_or_else(|| TransitError::MalformedChannel(name.to_string()))?;

        let (token, node_id) = match rest.split_once('.') {
            Some((token, node_id)) if !node_id.is_empty() => (token, Some(node_id)),
            Some(_) => return Err(TransitError::MalformedChannel(name.to_string())),
            None => (rest, None),
        };

        let kind = ChannelKind::from_token(token)
            .ok_or_else(|| TransitError::MalformedChannel(name.to_string()))?;

        Ok(Self {
            kind,
            node_id: node_id.map(str::to_string),
        })
    }
}
