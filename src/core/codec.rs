//! # Packet Codec
//!
//! [`tokio_util::codec`] `Decoder`/`Encoder` pair for the wire frame, used
//! with `Framed` on every TCP connection.
//!
//! Decoding is zero-copy past the header split and ordered strictly: the
//! crc is verified first, then the kind byte, then the length bounds; only
//! after all three does the declared length drive any buffer read. A frame
//! that fails any check poisons the stream (the connection is closed by the
//! caller; there is no way to resynchronize a torn byte stream).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{Packet, PacketKind, HEADER_LEN};
use crate::error::TransitError;

/// Default ceiling for a single frame, header included.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Frame codec with a configurable packet-size ceiling.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = TransitError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, TransitError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // crc before anything else; a corrupt header must not steer a read
        let expected = src[1] ^ src[2] ^ src[3] ^ src[4] ^ src[5];
        if src[0] != expected {
            return Err(TransitError::InvalidChecksum {
                expected,
                found: src[0],
            });
        }

        let kind =
            PacketKind::from_wire(src[5]).ok_or(TransitError::InvalidPacketKind(src[5]))?;

        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if length < HEADER_LEN {
            return Err(TransitError::InvalidFrameLength(length));
        }
        if length > self.max_packet_size {
            return Err(TransitError::OversizedPacket(length, self.max_packet_size));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length).freeze();
        Ok(Some(Packet {
            kind,
            payload: frame.slice(HEADER_LEN..),
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = TransitError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), TransitError> {
        item.write_to(dst, self.max_packet_size)
    }
}
