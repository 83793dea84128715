//! Typed response bodies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CpsError, Result};

/// A typed view over a response body.
///
/// `parse` treats an absent body as `{}` so that all-optional and empty
/// responses decode without special cases.
pub trait ControlResponse: Serialize + DeserializeOwned + Send + Sized + 'static {
    /// Validate and extract typed fields.
    fn parse(body: Option<&Value>) -> Result<Self> {
        let result = match body {
            Some(value) => Self::deserialize(value),
            None => Self::deserialize(Value::Object(Map::new())),
        };
        result.map_err(|e| {
            CpsError::MalformedResponse(format!("{}: {}", std::any::type_name::<Self>(), e))
        })
    }

    /// Body as sent on the wire; empty objects become absent.
    fn to_body(&self) -> Result<Option<Value>> {
        to_optional_body(self)
    }
}

pub(crate) fn to_optional_body<T: Serialize + ?Sized>(value: &T) -> Result<Option<Value>> {
    Ok(match serde_json::to_value(value)? {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    })
}

/// Response with no payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

impl ControlResponse for EmptyResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

impl ControlResponse for StartSessionResponse {}

/// Device identity reported by `/server/information`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInformation {
    pub id: String,
    pub name: String,
    pub model: String,
    pub platform_name: String,
    pub platform_version: String,
    pub software_name: String,
    pub software_version: String,
    /// TCP port of the export server.
    pub export_port: u16,
}

impl ControlResponse for ServerInformation {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub is_recording: bool,
    /// Device-specific state object, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_state: Option<Value>,
}

impl ControlResponse for StateResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingTakeResponse {
    pub take_name: String,
}

impl ControlResponse for StopRecordingTakeResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeListResponse {
    pub names: Vec<String>,
}

impl ControlResponse for TakeListResponse {}

/// One file of a take as listed in its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeFile {
    pub name: String,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub frames: u64,
    pub frame_rate: f64,
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_channel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeMetadata {
    pub name: String,
    pub slate_name: String,
    pub take_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub files: Vec<TakeFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeMetadataResponse {
    pub takes: Vec<TakeMetadata>,
}

impl ControlResponse for TakeMetadataResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSubject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSubjectsResponse {
    pub subjects: Vec<StreamingSubject>,
}

impl ControlResponse for StreamingSubjectsResponse {}
