//! # Core Wire Components
//!
//! Low-level packet framing, the stream codec, channel naming, and payload
//! serialization: everything below the protocol engine and shared by every
//! transport backend.
//!
//! ## Components
//! - **Packet**: binary frame format with an XOR header checksum
//! - **Codec**: tokio codec for framing packets over byte streams
//! - **Channel**: `{prefix}.{KIND}[.{nodeID}]` naming scheme
//! - **Serialization**: pluggable payload formats (bincode/JSON/MessagePack)
//!
//! ## Wire Format
//! ```text
//! [Crc(1)] [Length(4, BE)] [Kind(1)] [Payload(N)]
//! ```
//!
//! Length counts the whole frame; the checksum and kind byte are validated
//! before the length drives any buffer read.

pub mod channel;
pub mod codec;
pub mod packet;
pub mod serialization;

pub use channel::{Channel, ChannelKind};
pub use codec::{PacketCodec, DEFAULT_MAX_PACKET_SIZE};
pub use packet::{Packet, PacketKind, HEADER_LEN};
pub use serialization::{WireFormat, WireMessage};

/// Version tag carried by every control message.
pub const PROTOCOL_VERSION: u8 = 1;
