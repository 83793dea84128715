//! Dedicated writer task owning the write half of the control connection.
//!
//! # Architecture
//!
//! ```text
//! send_request ─┐
//! keep-alive   ─┼─► mpsc::Sender<OutboundPacket> ─► Writer Task ─► TCP
//! callbacks    ─┘
//! ```
//!
//! Callers never touch the socket; they enqueue encoded packets and the
//! writer drains them in order. Packets that are ready together are written
//! back to back and flushed once.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CpsError, Result};
use crate::protocol::ControlPacket;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for one batch write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum packets to batch before flushing.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded packet ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    /// Header and payload as one contiguous buffer.
    pub bytes: Bytes,
}

impl OutboundPacket {
    #[inline]
    pub fn new(packet: &ControlPacket) -> Self {
        Self {
            bytes: packet.to_bytes(),
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the packet queue.
    pub channel_capacity: usize,
    /// Timeout for writing and flushing one batch.
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Handle for enqueueing packets on the writer task.
///
/// Cheaply cloneable. The task exits once every handle is dropped.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundPacket>,
}

impl WriterHandle {
    /// Enqueue a packet, waiting for channel capacity if needed.
    pub async fn send(&self, packet: OutboundPacket) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| CpsError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for enqueueing packets.
///
/// The task ends when every handle is dropped or a write fails; in the
/// latter case the error is returned through the `JoinHandle`.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let handle = WriterHandle { tx };
    let task = tokio::spawn(writer_loop(rx, writer, config.write_timeout));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundPacket>,
    mut writer: W,
    write_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let Some(first) = rx.recv().await else {
            tracing::debug!("Send queue closed, writer exiting");
            let _ = writer.shutdown().await;
            return Ok(());
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(_) => break,
            }
        }

        match tokio::time::timeout(write_timeout, write_batch(&mut writer, &batch)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Control write failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::error!("Control write timed out after {:?}", write_timeout);
                return Err(CpsError::Timeout);
            }
        }
    }
}

/// Write each packet with a single `write_all`, then flush once.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundPacket]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for packet in batch {
        writer.write_all(&packet.bytes).await?;
    }
    writer.flush().await?;
    Ok(())
}
