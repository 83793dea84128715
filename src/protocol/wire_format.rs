//! Control packet header encoding and decoding.
//!
//! Implements the 17-byte header format:
//! ```text
//! ┌──────────────────────┬─────────┬──────────────┐
//! │ Magic "CPSCONTROL\0" │ Version │ Payload size │
//! │ 11 bytes             │ uint16  │ uint32       │
//! └──────────────────────┴─────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian.

use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::{CpsError, Result};
use crate::transport::read_exact_timeout;

/// Magic bytes opening every control packet.
pub const CONTROL_MAGIC: &[u8; 11] = b"CPSCONTROL\0";

/// Header size in bytes (magic + version + payload size).
pub const HEADER_SIZE: usize = 17;

/// Control protocol version spoken by this client.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default maximum accepted payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Decoded control packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPacketHeader {
    /// Protocol version of the payload.
    pub version: u16,
    /// Payload length in bytes.
    pub payload_size: u32,
}

impl ControlPacketHeader {
    /// Create a new header.
    pub fn new(version: u16, payload_size: u32) -> Self {
        Self {
            version,
            payload_size,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use cps_client::protocol::{ControlPacketHeader, HEADER_SIZE};
    ///
    /// let header = ControlPacketHeader::new(1, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[..11], b"CPSCONTROL\0");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..11].copy_from_slice(CONTROL_MAGIC);
        buf[11..13].copy_from_slice(&self.version.to_le_bytes());
        buf[13..17].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Decode header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Fails with [`CpsError::HeaderMismatch`] if the magic differs. The
    /// caller's buffer is never advanced, so a failed decode leaves the
    /// stream position untouched.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CpsError::Protocol(format!(
                "Control header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        if buf[..11] != CONTROL_MAGIC[..] {
            return Err(CpsError::HeaderMismatch);
        }
        Ok(Self {
            version: u16::from_le_bytes([buf[11], buf[12]]),
            payload_size: u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
        })
    }

    /// Read and decode one header from `reader`.
    pub async fn read_from<R>(reader: &mut R, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; HEADER_SIZE];
        read_exact_timeout(reader, &mut buf, timeout).await?;
        Self::decode(&buf)
    }

    /// Reject payload sizes above `max_payload_size`.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_size > max_payload_size {
            return Err(CpsError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_size, max_payload_size
            )));
        }
        Ok(())
    }
}
