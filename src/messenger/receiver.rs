//! Receive loop: the only reader of the control connection.

use std::io::ErrorKind;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use super::{ConnectionShared, Inner};
use crate::control::ControlUpdate;
use crate::error::{CpsError, Result};
use crate::protocol::{ControlMessage, ControlPacket, ControlPacketHeader, MessageType, HEADER_SIZE};

pub(crate) struct ReceiverConfig {
    pub protocol_version: u16,
    pub max_payload_size: u32,
    pub payload_timeout: Duration,
}

/// Read packets until cancelled or the connection fails.
///
/// On failure, outstanding requests are failed with `ConnectionClosed`,
/// the disconnect handler runs once and the messenger is stopped.
pub(crate) async fn run<R>(
    inner: Weak<Inner>,
    connection: Arc<ConnectionShared>,
    mut reader: R,
    config: ReceiverConfig,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => return,
            packet = read_packet(&mut reader, &config) => packet,
        };

        let Some(messenger) = inner.upgrade() else {
            return;
        };

        match packet {
            Ok(packet) => messenger.handle_packet(&packet, config.protocol_version),
            Err(CpsError::HeaderMismatch) => {
                tracing::warn!("Dropping control packet with bad magic");
            }
            Err(e) => break e,
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    tracing::error!("Control receive loop ended: {}", error);

    let Some(messenger) = inner.upgrade() else {
        return;
    };
    let failed = messenger.pending.fail_all();
    if failed > 0 {
        tracing::debug!("Failed {} pending request(s) after disconnect", failed);
    }
    messenger.report_disconnect(&connection);
    let generation = connection.generation;
    tokio::spawn(async move { messenger.shutdown(Some(generation)).await });
}

/// Read one packet. The header wait is unbounded; the payload must follow
/// within `payload_timeout`.
async fn read_packet<R>(reader: &mut R, config: &ReceiverConfig) -> Result<ControlPacket>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(CpsError::ConnectionClosed),
        Err(e) => return Err(CpsError::Io(e)),
    }
    let header = ControlPacketHeader::decode(&buf)?;
    header.validate(config.max_payload_size)?;
    ControlPacket::read_payload(header, reader, config.payload_timeout).await
}

impl Inner {
    /// Route one decoded packet. Protocol errors only drop the packet.
    pub(crate) fn handle_packet(&self, packet: &ControlPacket, version: u16) {
        let message = match ControlMessage::from_packet(packet, version) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable control message: {}", e);
                return;
            }
        };

        match message.message_type {
            MessageType::Response => {
                let transaction_id = message.transaction_id;
                if !self.pending.resolve(transaction_id, message) {
                    tracing::debug!(
                        "Dropping response for unknown transaction {}",
                        transaction_id
                    );
                }
            }
            MessageType::Update => self.handle_update(message),
            MessageType::Request => {
                tracing::warn!(
                    "Dropping unexpected request from server on {}",
                    message.address_path
                );
            }
        }
    }

    fn handle_update(&self, message: ControlMessage) {
        let path = message.address_path.as_str();
        let decoded = self.decoders().decode(path, message.body.as_ref());
        let update = match decoded {
            Some(Ok(update)) => update,
            Some(Err(e)) => {
                tracing::warn!("Dropping malformed update on {}: {}", path, e);
                return;
            }
            None => {
                tracing::debug!("Dropping update for unknown path {}", path);
                return;
            }
        };

        if matches!(update, ControlUpdate::SessionStopped) {
            tracing::debug!("Server stopped the session");
            self.clear_session();
            self.stop_keep_alive();
        }

        let handler = self.handlers().get(path);
        match handler {
            Some(handler) => handler.call(update),
            None => tracing::debug!("No handler registered for update {}", path),
        }
    }
}
