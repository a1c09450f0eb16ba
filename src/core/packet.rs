//! # Wire Packets
//!
//! The binary frame shared by every transport backend:
//!
//! ```text
//! +-----+-------------------+------+------------------+
//! | crc | length (u32, BE)  | kind | payload ...      |
//! +-----+-------------------+------+------------------+
//!   1B          4B             1B     length - 6 bytes
//! ```
//!
//! `length` counts the whole frame including the 6-byte header. `crc` is the
//! XOR of the four length bytes and the kind byte, a corruption check for
//! torn TCP streams rather than a cryptographic digest. Receivers validate
//! the crc and kind before trusting `length` for any buffer arithmetic.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransitError};

/// Size of the frame header (crc + length + kind).
pub const HEADER_LEN: usize = 6;

/// Logical purpose of a wire frame.
///
/// The numeric ids are the on-wire `kind` byte; broker backends never send
/// the three gossip kinds (gossip only runs on the point-to-point backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Fire-and-forget event emission
    Event = 1,
    /// Action invocation request
    Request = 2,
    /// Action invocation response
    Response = 3,
    /// Latency probe
    Ping = 4,
    /// Latency probe answer
    Pong = 5,
    /// Gossip membership summary (expects a response)
    GossipRequest = 6,
    /// Gossip membership delta (terminal)
    GossipResponse = 7,
    /// Introduction frame sent on a fresh outbound connection
    GossipHello = 8,
}

impl PacketKind {
    /// Decode the on-wire kind byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PacketKind::Event),
            2 => Some(PacketKind::Request),
            3 => Some(PacketKind::Response),
            4 => Some(PacketKind::Ping),
            5 => Some(PacketKind::Pong),
            6 => Some(PacketKind::GossipRequest),
            7 => Some(PacketKind::GossipResponse),
            8 => Some(PacketKind::GossipHello),
            _ => None,
        }
    }

    /// The on-wire kind byte.
    pub fn wire_id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Event => "EVENT",
            PacketKind::Request => "REQ",
            PacketKind::Response => "RES",
            PacketKind::Ping => "PING",
            PacketKind::Pong => "PONG",
            PacketKind::GossipRequest => "GOSSIP_REQ",
            PacketKind::GossipResponse => "GOSSIP_RSP",
            PacketKind::GossipHello => "GOSSIP_HELLO",
        }
    }
}

/// One wire frame: a kind tag plus an opaque, already-serialized payload.
/// Stateless and built per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Total frame length including the header.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// XOR checksum over the four big-endian length bytes and the kind byte.
    pub fn header_checksum(length: u32, kind: u8) -> u8 {
        let len = length.to_be_bytes();
        len[0] ^ len[1] ^ len[2] ^ len[3] ^ kind
    }

    /// Append the encoded frame to `dst`. Fails if the frame would exceed
    /// `max_len` (oversized packets must never reach the wire).
    pub fn write_to(&self, dst: &mut BytesMut, max_len: usize) -> Result<()> {
        let total = self.frame_len();
        if total > max_len {
            return Err(TransitError::OversizedPacket(total, max_len));
        }
        let length = total as u32;
        let kind = self.kind.wire_id();
        dst.reserve(total);
        dst.put_u8(Self::header_checksum(length, kind));
        dst.put_u32(length);
        dst.put_u8(kind);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode into a standalone buffer.
    pub fn to_bytes(&self, max_len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.write_to(&mut buf, max_len)?;
        Ok(buf.freeze())
    }
}
