//! # Serialization Formats
//!
//! Abstraction over the serialization formats used for control-message
//! payloads (node info, gossip blocks, heartbeats). The framing layer never
//! looks inside a payload; every node in a cluster is configured with the
//! same format and the codec stays swappable.
//!
//! ## Supported formats
//! - **Bincode**: binary, compact, fastest (default)
//! - **JSON**: human-readable, handy for debugging a live cluster
//! - **MessagePack**: compact binary for bandwidth-constrained links
//!
//! ## Usage
//! ```rust
//! use mesh_transit::core::serialization::{WireFormat, WireMessage};
//! use mesh_transit::protocol::message::DiscoverMessage;
//!
//! let msg = DiscoverMessage::new("node-1");
//! let bytes = msg.encode(WireFormat::Bincode).unwrap();
//! let back = DiscoverMessage::decode(&bytes, WireFormat::Bincode).unwrap();
//! assert_eq!(msg, back);
//! ```

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Supported payload serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack)
    MessagePack,
}

impl WireFormat {
    /// Parse a configuration name ("bincode", "json", "msgpack").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bincode" => Some(WireFormat::Bincode),
            "json" => Some(WireFormat::Json),
            "msgpack" | "messagepack" => Some(WireFormat::MessagePack),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            WireFormat::Bincode => "bincode",
            WireFormat::Json => "json",
            WireFormat::MessagePack => "msgpack",
        }
    }
}

/// Encode/decode in any supported [`WireFormat`].
///
/// Blanket-implemented for every serde-capable type, so all control
/// messages pick it up for free.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Serialize to bytes using the specified format.
    fn encode(&self, format: WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Bincode => Ok(bincode::serialize(self)?),
            WireFormat::Json => Ok(serde_json::to_vec(self)?),
            WireFormat::MessagePack => Ok(rmp_serde::to_vec_named(self)?),
        }
    }

    /// Deserialize from bytes using the specified format.
    fn decode(data: &[u8], format: WireFormat) -> Result<Self> {
        match format {
            WireFormat::Bincode => Ok(bincode::deserialize(data)?),
            WireFormat::Json => Ok(serde_json::from_slice(data)?),
            WireFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
        }
    }
}

impl<T: Serialize + DeserializeOwned> WireMessage for T {}
