//! Control packet: header plus opaque JSON payload.
//!
//! Uses `bytes::Bytes` so a decoded payload can be handed to the message
//! codec without copying.
//!
//! # Example
//!
//! ```
//! use cps_client::protocol::{ControlPacket, HEADER_SIZE};
//! use bytes::Bytes;
//!
//! let packet = ControlPacket::new(1, Bytes::from_static(b"{}")).unwrap();
//! assert_eq!(packet.header().payload_size, 2);
//! assert_eq!(packet.to_bytes().len(), HEADER_SIZE + 2);
//! ```

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncRead;

use super::wire_format::{ControlPacketHeader, HEADER_SIZE};
use crate::error::{CpsError, Result};
use crate::transport::read_exact_timeout;

/// A complete control packet. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    header: ControlPacketHeader,
    payload: Bytes,
}

impl ControlPacket {
    /// Create a packet; the header's payload size is taken from `payload`.
    pub fn new(version: u16, payload: Bytes) -> Result<Self> {
        let size = u32::try_from(payload.len()).map_err(|_| {
            CpsError::Protocol(format!("Payload of {} bytes does not fit a u32", payload.len()))
        })?;
        Ok(Self {
            header: ControlPacketHeader::new(version, size),
            payload,
        })
    }

    /// Decoded header.
    #[inline]
    pub fn header(&self) -> &ControlPacketHeader {
        &self.header
    }

    /// Protocol version of the payload.
    #[inline]
    pub fn version(&self) -> u16 {
        self.header.version
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Read exactly `header.payload_size` bytes following an already decoded header.
    pub async fn read_payload<R>(
        header: ControlPacketHeader,
        reader: &mut R,
        timeout: Duration,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut payload = BytesMut::zeroed(header.payload_size as usize);
        read_exact_timeout(reader, &mut payload, timeout).await?;
        Ok(Self {
            header,
            payload: payload.freeze(),
        })
    }

    /// Read a whole packet (header, then payload) from `reader`.
    pub async fn read_from<R>(reader: &mut R, max_payload_size: u32, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let header = ControlPacketHeader::read_from(reader, timeout).await?;
        header.validate(max_payload_size)?;
        Self::read_payload(header, reader, timeout).await
    }

    /// Decode one packet from the front of `buf`, advancing past it.
    ///
    /// Nothing is consumed when the header is rejected or the buffer holds
    /// less than a full packet.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let header = ControlPacketHeader::decode(buf)?;
        let total = HEADER_SIZE + header.payload_size as usize;
        if buf.len() < total {
            return Err(CpsError::Protocol(format!(
                "Packet truncated: need {} bytes, have {}",
                total,
                buf.len()
            )));
        }
        buf.advance(HEADER_SIZE);
        let payload = buf.split_to(header.payload_size as usize);
        Ok(Self { header, payload })
    }

    /// Magic + version + size + payload as one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Consume the packet, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
