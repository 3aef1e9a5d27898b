use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const AUTO_RITASE: &str = "auto_ritase";

/// A background-detected event waiting for the foreground to upload it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRecord {
  #[serde(rename = "type")]
  pub kind: String,
  /// ISO-8601, millisecond precision, UTC
  pub timestamp: String,
  pub geofence: String,
}

impl StagedRecord {
  pub fn auto_ritase(geofence: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      kind: AUTO_RITASE.to_string(),
      timestamp: iso_timestamp(at),
      geofence: geofence.into(),
    }
  }
}

/// A staged record together with its storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedEntry {
  pub key: i64,
  #[serde(flatten)]
  pub record: StagedRecord,
}

/// `2024-05-01T07:30:00.000Z`
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
