//! # Error Types
//!
//! Comprehensive error handling for the transit layer.
//!
//! This module defines all error variants that can occur between the wire
//! framing at the bottom and the protocol engine at the top, from low-level
//! I/O errors to membership-protocol violations.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and file system failures
//! - **Codec Errors**: Corrupt frames, checksum mismatches, oversized packets
//! - **Serialization Errors**: Malformed control-message payloads
//! - **Protocol Errors**: Bad channel names, bad seed URLs, unknown peers
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use mesh_transit::error::{Result, TransitError};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse()
//!         .map_err(|_| TransitError::ConfigError(format!("bad port: {raw}")))
//! }
//!
//! assert!(parse_port("7328").is_ok());
//! assert!(parse_port("seven").is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Frame validation errors
    pub const ERR_INVALID_CRC: &str = "Invalid frame checksum";
    pub const ERR_INVALID_PACKET_KIND: &str = "Invalid packet kind";
    pub const ERR_INVALID_FRAME_LENGTH: &str = "Invalid frame length";
    pub const ERR_OVERSIZED_PACKET: &str = "Packet exceeds maximum size";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NODE_UNREACHABLE: &str = "Node is not reachable";
    pub const ERR_NOT_CONNECTED: &str = "Transport is not connected";

    /// Membership and channel errors
    pub const ERR_MALFORMED_CHANNEL: &str = "Malformed channel name";
    pub const ERR_MALFORMED_SEED_URL: &str = "Malformed seed URL";
    pub const ERR_UNKNOWN_NODE: &str = "Unknown node";
    pub const ERR_UNSUPPORTED_CHANNEL: &str = "Channel kind not supported by this transport";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// TransitError is the primary error type for all transit operations.
#[derive(Error, Debug)]
pub enum TransitError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Invalid frame checksum (expected {expected:#04x}, found {found:#04x})")]
    InvalidChecksum { expected: u8, found: u8 },

    #[error("Invalid packet kind: {0}")]
    InvalidPacketKind(u8),

    #[error("Invalid frame length: {0} bytes")]
    InvalidFrameLength(usize),

    #[error("Packet too large: {0} bytes (limit {1})")]
    OversizedPacket(usize, usize),

    #[error("Malformed channel name: {0}")]
    MalformedChannel(String),

    #[error("Malformed seed URL: {0}")]
    MalformedSeedUrl(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node {0} is not reachable")]
    NodeUnreachable(String),

    #[error("Channel kind not supported by this transport: {0}")]
    UnsupportedChannel(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using TransitError
pub type Result<T> = std::result::Result<T, TransitError>;
