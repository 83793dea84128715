//! Typed requests, each bound to its address path and response type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::responses::{
    to_optional_body, ControlResponse, EmptyResponse, ServerInformation, StartSessionResponse,
    StateResponse, StopRecordingTakeResponse, StreamingSubjectsResponse, TakeListResponse,
    TakeMetadataResponse,
};
use crate::error::Result;

/// A request the client can send.
///
/// The associated `Response` fixes what `send_request` yields, so a request
/// can only ever be answered with its own response type.
pub trait ControlRequest: Serialize + Send + Sync {
    const ADDRESS_PATH: &'static str;

    type Response: ControlResponse;

    /// Body as sent on the wire; unit and empty requests have none.
    fn body(&self) -> Result<Option<Value>> {
        to_optional_body(self)
    }
}

macro_rules! empty_request {
    ($(#[$meta:meta])* $name:ident, $path:literal, $response:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name;

        impl ControlRequest for $name {
            const ADDRESS_PATH: &'static str = $path;
            type Response = $response;
        }
    };
}

empty_request!(
    /// Liveness heartbeat.
    KeepAlive,
    "/keepAlive",
    EmptyResponse
);
empty_request!(
    /// Opens a session; must precede every other request.
    StartSession,
    "/session/start",
    StartSessionResponse
);
empty_request!(StopSession, "/session/stop", EmptyResponse);
empty_request!(
    GetServerInformation,
    "/server/information",
    ServerInformation
);
empty_request!(
    /// Enable update delivery for this session.
    Subscribe,
    "/subscribe",
    EmptyResponse
);
empty_request!(Unsubscribe, "/unsubscribe", EmptyResponse);
empty_request!(GetState, "/state", StateResponse);
empty_request!(
    StopRecordingTake,
    "/recording/take/stop",
    StopRecordingTakeResponse
);
empty_request!(AbortRecordingTake, "/recording/take/abort", EmptyResponse);
empty_request!(GetTakeList, "/takes", TakeListResponse);
empty_request!(
    GetStreamingSubjects,
    "/streaming/subjects",
    StreamingSubjectsResponse
);
empty_request!(StopStreaming, "/streaming/stop", EmptyResponse);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingTake {
    pub slate_name: String,
    pub take_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl StartRecordingTake {
    pub fn new(slate_name: impl Into<String>, take_number: u32) -> Self {
        Self {
            slate_name: slate_name.into(),
            take_number,
            subject: None,
            scenario: None,
            tags: None,
        }
    }
}

impl ControlRequest for StartRecordingTake {
    const ADDRESS_PATH: &'static str = "/recording/take/start";
    type Response = EmptyResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTakeMetadata {
    pub names: Vec<String>,
}

impl ControlRequest for GetTakeMetadata {
    const ADDRESS_PATH: &'static str = "/takes/metadata";
    type Response = TakeMetadataResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreaming {
    /// UDP port the device streams to.
    pub stream_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
}

impl ControlRequest for StartStreaming {
    const ADDRESS_PATH: &'static str = "/streaming/start";
    type Response = EmptyResponse;
}
