//! Control channel codecs.
//!
//! - 17-byte packet header encoding/decoding
//! - Packet struct owning its JSON payload
//! - JSON message envelope with typed accessors

mod message;
mod packet;
mod wire_format;

pub use message::{now_millis, ControlError, ControlMessage, MessageType};
pub use packet::ControlPacket;
pub use wire_format::{
    ControlPacketHeader, CONTROL_MAGIC, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, PROTOCOL_VERSION,
};
