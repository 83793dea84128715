//! Shared fixtures: an in-memory connector and control server helpers.

#![allow(dead_code)]

use std::time::Duration;

use cps_client::control::ControlUpdate;
use cps_client::protocol::{
    now_millis, ControlError, ControlMessage, ControlPacket, MessageType,
    DEFAULT_MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use cps_client::transport::{BoxFuture, BoxedStream, Connector};
use cps_client::{CpsError, Result};
use serde_json::Value;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands the server end of every new connection to the test.
pub struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::with_buffer(64 * 1024)
    }

    pub fn with_buffer(buffer: usize) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { servers: tx, buffer }, rx)
    }
}

impl Connector for DuplexConnector {
    fn connect(&self, _address: &str) -> BoxFuture<'static, Result<BoxedStream>> {
        let (client, server) = duplex(self.buffer);
        let sent = self.servers.send(server);
        Box::pin(async move {
            sent.map_err(|_| CpsError::ConnectionClosed)?;
            Ok(Box::new(client) as BoxedStream)
        })
    }
}

/// Refuses every connection.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self, _address: &str) -> BoxFuture<'static, Result<BoxedStream>> {
        Box::pin(async {
            Err(CpsError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        })
    }
}

pub async fn read_message(stream: &mut DuplexStream) -> ControlMessage {
    let packet = ControlPacket::read_from(stream, DEFAULT_MAX_PAYLOAD_SIZE, IO_TIMEOUT)
        .await
        .unwrap();
    ControlMessage::from_packet(&packet, PROTOCOL_VERSION).unwrap()
}

pub async fn write_message(stream: &mut DuplexStream, message: &ControlMessage) {
    let bytes = message.to_packet(PROTOCOL_VERSION).unwrap().to_bytes();
    stream.write_all(&bytes).await.unwrap();
    stream.flush().await.unwrap();
}

/// Response echoing the request's path, session and transaction id.
pub fn response_to(request: &ControlMessage, body: Option<Value>) -> ControlMessage {
    ControlMessage::new(
        MessageType::Response,
        request.address_path.clone(),
        request.session_id.clone(),
        request.transaction_id,
        now_millis(),
    )
    .with_body(body)
}

pub fn error_response_to(request: &ControlMessage, name: &str, description: &str) -> ControlMessage {
    response_to(request, None).with_error(ControlError::new(name, description))
}

pub fn update(address_path: &str, session_id: &str, body: Option<Value>) -> ControlMessage {
    ControlMessage::new(MessageType::Update, address_path, session_id, 0, now_millis())
        .with_body(body)
}

/// Forward every update delivered to a handler into a channel.
pub fn update_channel() -> (
    impl Fn(ControlUpdate) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<ControlUpdate>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |update: ControlUpdate| {
        let _ = tx.send(update);
    };
    (handler, rx)
}
