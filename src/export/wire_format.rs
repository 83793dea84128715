//! Export channel packet codecs.
//!
//! ```text
//! Header   : "CPSEXPORT\0" (10) | version u16 | transaction id u32
//! Request  : Header | take len u16 | take | file len u16 | file | offset u64
//! Response : Header | status u8 | length u64 (only when status == 0)
//!            followed by <length> file bytes and a 16-byte MD5
//! ```
//!
//! All integers are Little Endian.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::{CpsError, Result};
use crate::transport::read_exact_timeout;

/// Magic bytes opening every export header.
pub const EXPORT_MAGIC: &[u8; 10] = b"CPSEXPORT\0";

/// Header size in bytes (magic + version + transaction id).
pub const EXPORT_HEADER_SIZE: usize = 16;

/// Size of the trailing file hash.
pub const HASH_SIZE: usize = 16;

/// Export header shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportHeader {
    pub version: u16,
    pub transaction_id: u32,
}

impl ExportHeader {
    pub fn new(version: u16, transaction_id: u32) -> Self {
        Self {
            version,
            transaction_id,
        }
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(EXPORT_MAGIC);
        buf.put_u16_le(self.version);
        buf.put_u32_le(self.transaction_id);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, EXPORT_HEADER_SIZE, "export header")?;
        let mut magic = [0u8; 10];
        buf.copy_to_slice(&mut magic);
        if &magic != EXPORT_MAGIC {
            return Err(CpsError::HeaderMismatch);
        }
        Ok(Self {
            version: buf.get_u16_le(),
            transaction_id: buf.get_u32_le(),
        })
    }
}

/// Client request for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub header: ExportHeader,
    pub take_name: String,
    pub file_name: String,
    /// Byte offset to start the transfer from.
    pub offset: u64,
}

impl ExportRequest {
    pub fn new(
        header: ExportHeader,
        take_name: impl Into<String>,
        file_name: impl Into<String>,
        offset: u64,
    ) -> Self {
        Self {
            header,
            take_name: take_name.into(),
            file_name: file_name.into(),
            offset,
        }
    }

    /// Fails if either name is longer than `u16::MAX` bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(
            EXPORT_HEADER_SIZE + 2 + self.take_name.len() + 2 + self.file_name.len() + 8,
        );
        self.header.encode_into(&mut buf);
        put_string(&mut buf, &self.take_name)?;
        put_string(&mut buf, &self.file_name)?;
        buf.put_u64_le(self.offset);
        Ok(buf.freeze())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = ExportHeader::decode(buf)?;
        let take_name = get_string(buf, "take name")?;
        let file_name = get_string(buf, "file name")?;
        ensure_remaining(buf, 8, "offset")?;
        Ok(Self {
            header,
            take_name,
            file_name,
            offset: buf.get_u64_le(),
        })
    }
}

/// Status byte of an export response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Success,
    InvalidTakeName,
    InvalidFileName,
    InvalidOffset,
    ServerError,
    UnsupportedProtocolVersion,
    /// Any byte without a defined meaning.
    Reserved,
}

impl ExportStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ExportStatus::Success,
            1 => ExportStatus::InvalidTakeName,
            2 => ExportStatus::InvalidFileName,
            3 => ExportStatus::InvalidOffset,
            4 => ExportStatus::ServerError,
            5 => ExportStatus::UnsupportedProtocolVersion,
            _ => ExportStatus::Reserved,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ExportStatus::Success => 0,
            ExportStatus::InvalidTakeName => 1,
            ExportStatus::InvalidFileName => 2,
            ExportStatus::InvalidOffset => 3,
            ExportStatus::ServerError => 4,
            ExportStatus::UnsupportedProtocolVersion => 5,
            ExportStatus::Reserved => 255,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == ExportStatus::Success
    }
}

/// Server response preceding a file's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportResponse {
    pub header: ExportHeader,
    pub status: ExportStatus,
    /// File length; present only on success.
    pub length: Option<u64>,
}

impl ExportResponse {
    pub fn success(header: ExportHeader, length: u64) -> Self {
        Self {
            header,
            status: ExportStatus::Success,
            length: Some(length),
        }
    }

    pub fn failure(header: ExportHeader, status: ExportStatus) -> Self {
        Self {
            header,
            status,
            length: None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EXPORT_HEADER_SIZE + 1 + 8);
        self.header.encode_into(&mut buf);
        buf.put_u8(self.status.as_u8());
        if self.status.is_success() {
            buf.put_u64_le(self.length.unwrap_or(0));
        }
        buf.freeze()
    }

    /// The length field is read only when the status is `Success`.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = ExportHeader::decode(buf)?;
        ensure_remaining(buf, 1, "status")?;
        let status = ExportStatus::from_u8(buf.get_u8());
        let length = if status.is_success() {
            ensure_remaining(buf, 8, "length")?;
            Some(buf.get_u64_le())
        } else {
            None
        };
        Ok(Self {
            header,
            status,
            length,
        })
    }

    /// Read one response, never consuming the length field of a failure.
    pub async fn read_from<R>(reader: &mut R, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; EXPORT_HEADER_SIZE + 1];
        read_exact_timeout(reader, &mut head, timeout).await?;
        let mut buf = &head[..];
        let header = ExportHeader::decode(&mut buf)?;
        let status = ExportStatus::from_u8(buf.get_u8());

        let length = if status.is_success() {
            let mut len = [0u8; 8];
            read_exact_timeout(reader, &mut len, timeout).await?;
            Some(u64::from_le_bytes(len))
        } else {
            None
        };
        Ok(Self {
            header,
            status,
            length,
        })
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CpsError::Protocol(format!(
            "Truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_string<B: BufMut>(buf: &mut B, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CpsError::Protocol(format!("Name of {} bytes exceeds u16 length prefix", value.len()))
    })?;
    buf.put_u16_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_string<B: Buf>(buf: &mut B, what: &str) -> Result<String> {
    ensure_remaining(buf, 2, what)?;
    let len = buf.get_u16_le() as usize;
    ensure_remaining(buf, len, what)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CpsError::Protocol(format!("{} is not UTF-8", what)))
}
