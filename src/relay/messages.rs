//! Message protocol between the worker and foreground instances.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Circle to monitor, as sent by the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceSpec {
  pub latitude: f64,
  pub longitude: f64,
  /// Metres
  pub radius: f64,
}

/// Foreground → worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
  RegisterGeofence { geofence: GeofenceSpec },
  UnregisterGeofence,
  CheckGeofenceSupport,
}

impl InboundMessage {
  pub fn decode(value: serde_json::Value) -> Result<Self, ProtocolError> {
    Ok(serde_json::from_value(value)?)
  }
}

/// Worker → every foreground instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
  GeofenceEnter { timestamp: String, geofence: String },
  GeofenceLeave { timestamp: String, geofence: String },
}

/// Reply to `CHECK_GEOFENCE_SUPPORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupportReply {
  pub supported: bool,
}
