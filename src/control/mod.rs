//! Typed control plane vocabulary.
//!
//! Every request fixes its address path and response type at compile time;
//! updates are decoded through an address-path table so new update kinds
//! can be added without touching the messenger.
//!
//! # Example
//!
//! ```ignore
//! use cps_client::control::{GetTakeMetadata, StartRecordingTake};
//!
//! messenger.send_request(StartRecordingTake::new("slate", 1)).await?;
//! let meta = messenger
//!     .send_request(GetTakeMetadata { names: vec!["slate_1".into()] })
//!     .await?;
//! ```

mod requests;
mod responses;
mod updates;

pub use requests::{
    AbortRecordingTake, ControlRequest, GetServerInformation, GetState, GetStreamingSubjects,
    GetTakeList, GetTakeMetadata, KeepAlive, StartRecordingTake, StartSession, StartStreaming,
    StopRecordingTake, StopSession, StopStreaming, Subscribe, Unsubscribe,
};
pub use responses::{
    AudioMetadata, ControlResponse, EmptyResponse, ServerInformation, StartSessionResponse,
    StateResponse, StopRecordingTakeResponse, StreamingSubject, StreamingSubjectsResponse,
    TakeFile, TakeListResponse, TakeMetadata, TakeMetadataResponse, VideoMetadata,
};
pub use updates::{
    raw_update, BatteryPercentage, ControlUpdate, DiskCapacity, RecordingStatus, TakeChanged,
    ThermalState, ThermalStateUpdate, UpdateDecoder, UpdateDecoders, BATTERY_PERCENTAGE,
    DISK_CAPACITY, RECORDING_STATUS, SESSION_STOPPED, TAKE_ADDED, TAKE_REMOVED, TAKE_UPDATED,
    THERMAL_STATE,
};
