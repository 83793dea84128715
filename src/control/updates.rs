//! Server-pushed updates and the address-path decoder table.
//!
//! # Example
//!
//! ```
//! use cps_client::control::{ControlUpdate, UpdateDecoders};
//! use serde_json::json;
//!
//! let decoders = UpdateDecoders::default();
//! let update = decoders
//!     .decode("/takes/added", Some(&json!({"name": "slate_1"})))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(update.address_path(), "/takes/added");
//! ```

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::responses::to_optional_body;
use crate::error::{CpsError, Result};

pub const SESSION_STOPPED: &str = "/session/stopped";
pub const TAKE_ADDED: &str = "/takes/added";
pub const TAKE_REMOVED: &str = "/takes/removed";
pub const TAKE_UPDATED: &str = "/takes/updated";
pub const RECORDING_STATUS: &str = "/recording/status";
pub const DISK_CAPACITY: &str = "/disk/capacity";
pub const BATTERY_PERCENTAGE: &str = "/battery";
pub const THERMAL_STATE: &str = "/thermal/state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeChanged {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
}

/// Storage figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCapacity {
    pub total: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryPercentage {
    pub level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalStateUpdate {
    pub state: ThermalState,
}

/// Every update the messenger can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlUpdate {
    SessionStopped,
    TakeAdded(TakeChanged),
    TakeRemoved(TakeChanged),
    TakeUpdated(TakeChanged),
    RecordingStatus(RecordingStatus),
    DiskCapacity(DiskCapacity),
    BatteryPercentage(BatteryPercentage),
    ThermalState(ThermalStateUpdate),
    /// Produced by decoders registered for paths not listed above.
    Other {
        address_path: String,
        body: Option<Value>,
    },
}

impl ControlUpdate {
    /// Address path this update is delivered on.
    pub fn address_path(&self) -> &str {
        match self {
            ControlUpdate::SessionStopped => SESSION_STOPPED,
            ControlUpdate::TakeAdded(_) => TAKE_ADDED,
            ControlUpdate::TakeRemoved(_) => TAKE_REMOVED,
            ControlUpdate::TakeUpdated(_) => TAKE_UPDATED,
            ControlUpdate::RecordingStatus(_) => RECORDING_STATUS,
            ControlUpdate::DiskCapacity(_) => DISK_CAPACITY,
            ControlUpdate::BatteryPercentage(_) => BATTERY_PERCENTAGE,
            ControlUpdate::ThermalState(_) => THERMAL_STATE,
            ControlUpdate::Other { address_path, .. } => address_path,
        }
    }

    /// Body as sent on the wire.
    pub fn to_body(&self) -> Result<Option<Value>> {
        match self {
            ControlUpdate::SessionStopped => Ok(None),
            ControlUpdate::TakeAdded(b) | ControlUpdate::TakeRemoved(b) | ControlUpdate::TakeUpdated(b) => {
                to_optional_body(b)
            }
            ControlUpdate::RecordingStatus(b) => to_optional_body(b),
            ControlUpdate::DiskCapacity(b) => to_optional_body(b),
            ControlUpdate::BatteryPercentage(b) => to_optional_body(b),
            ControlUpdate::ThermalState(b) => to_optional_body(b),
            ControlUpdate::Other { body, .. } => Ok(body.clone()),
        }
    }
}

/// Decodes an update body received on `address_path`.
pub type UpdateDecoder = fn(address_path: &str, body: Option<&Value>) -> Result<ControlUpdate>;

/// Address path to decoder table.
///
/// `Default` carries every built-in update; [`UpdateDecoders::register`]
/// adds or replaces a path without touching the dispatcher.
#[derive(Clone)]
pub struct UpdateDecoders {
    decoders: HashMap<String, UpdateDecoder>,
}

impl UpdateDecoders {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register(&mut self, address_path: impl Into<String>, decoder: UpdateDecoder) {
        self.decoders.insert(address_path.into(), decoder);
    }

    pub fn contains(&self, address_path: &str) -> bool {
        self.decoders.contains_key(address_path)
    }

    /// `None` for paths without a decoder.
    pub fn decode(&self, address_path: &str, body: Option<&Value>) -> Option<Result<ControlUpdate>> {
        self.decoders
            .get(address_path)
            .map(|decoder| decoder(address_path, body))
    }
}

impl Default for UpdateDecoders {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(SESSION_STOPPED, |_, _| Ok(ControlUpdate::SessionStopped));
        table.register(TAKE_ADDED, |p, b| parse_body(p, b).map(ControlUpdate::TakeAdded));
        table.register(TAKE_REMOVED, |p, b| parse_body(p, b).map(ControlUpdate::TakeRemoved));
        table.register(TAKE_UPDATED, |p, b| parse_body(p, b).map(ControlUpdate::TakeUpdated));
        table.register(RECORDING_STATUS, |p, b| {
            parse_body(p, b).map(ControlUpdate::RecordingStatus)
        });
        table.register(DISK_CAPACITY, |p, b| {
            parse_body(p, b).map(ControlUpdate::DiskCapacity)
        });
        table.register(BATTERY_PERCENTAGE, |p, b| {
            parse_body(p, b).map(ControlUpdate::BatteryPercentage)
        });
        table.register(THERMAL_STATE, |p, b| {
            parse_body(p, b).map(ControlUpdate::ThermalState)
        });
        table
    }
}

impl std::fmt::Debug for UpdateDecoders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<_> = self.decoders.keys().collect();
        paths.sort();
        f.debug_struct("UpdateDecoders").field("paths", &paths).finish()
    }
}

/// Passes the body through unchanged as [`ControlUpdate::Other`].
pub fn raw_update(address_path: &str, body: Option<&Value>) -> Result<ControlUpdate> {
    Ok(ControlUpdate::Other {
        address_path: address_path.to_string(),
        body: body.cloned(),
    })
}

fn parse_body<T: DeserializeOwned>(address_path: &str, body: Option<&Value>) -> Result<T> {
    let result = match body {
        Some(value) => T::deserialize(value),
        None => T::deserialize(Value::Object(Map::new())),
    };
    result.map_err(|e| CpsError::MalformedMessage(format!("{} update: {}", address_path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(update: ControlUpdate) {
        let decoders = UpdateDecoders::default();
        let body = update.to_body().unwrap();
        let decoded = decoders
            .decode(update.address_path(), body.as_ref())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_builtin_updates_roundtrip() {
        roundtrip(ControlUpdate::SessionStopped);
        roundtrip(ControlUpdate::TakeAdded(TakeChanged { name: "a".into() }));
        roundtrip(ControlUpdate::TakeRemoved(TakeChanged { name: "b".into() }));
        roundtrip(ControlUpdate::TakeUpdated(TakeChanged { name: "c".into() }));
        roundtrip(ControlUpdate::RecordingStatus(RecordingStatus { is_recording: true }));
        roundtrip(ControlUpdate::DiskCapacity(DiskCapacity {
            total: 256_000_000_000,
            remaining: 12_345,
        }));
        roundtrip(ControlUpdate::BatteryPercentage(BatteryPercentage { level: 87.5 }));
        roundtrip(ControlUpdate::ThermalState(ThermalStateUpdate {
            state: ThermalState::Serious,
        }));
    }

    #[test]
    fn test_unknown_path_is_none() {
        let decoders = UpdateDecoders::default();
        assert!(decoders.decode("/unknown", None).is_none());
    }

    #[test]
    fn test_register_extension_decoder() {
        let mut decoders = UpdateDecoders::default();
        decoders.register("/custom/event", raw_update);

        let update = decoders
            .decode("/custom/event", Some(&json!({"x": 1})))
            .unwrap()
            .unwrap();
        assert_eq!(
            update,
            ControlUpdate::Other {
                address_path: "/custom/event".into(),
                body: Some(json!({"x": 1})),
            }
        );
        roundtrip_other(update);
    }

    fn roundtrip_other(update: ControlUpdate) {
        let mut decoders = UpdateDecoders::empty();
        decoders.register(update.address_path().to_string(), raw_update);
        let body = update.to_body().unwrap();
        let decoded = decoders
            .decode(update.address_path(), body.as_ref())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_malformed_update_body() {
        let decoders = UpdateDecoders::default();
        let result = decoders
            .decode(THERMAL_STATE, Some(&json!({"state": "melting"})))
            .unwrap();
        assert!(matches!(result, Err(CpsError::MalformedMessage(_))));
    }

    #[test]
    fn test_thermal_state_wire_names() {
        let body = ControlUpdate::ThermalState(ThermalStateUpdate {
            state: ThermalState::Nominal,
        })
        .to_body()
        .unwrap();
        assert_eq!(body, Some(json!({"state": "nominal"})));
    }
}
