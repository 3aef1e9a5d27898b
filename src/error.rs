//! Error types for the worker's subsystems.
//!
//! Only install failures are fatal. Everything else is logged by the caller
//! and degrades to "serve the app, relay events".

use thiserror::Error;

/// A single network round-trip failed before a response arrived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("request to {url} failed: {reason}")]
  Unreachable { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("cache database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode cached headers: {0}")]
  Headers(#[from] serde_json::Error),

  #[error("cache lock poisoned")]
  Poisoned,
}

/// The manifest could not be fully cached; nothing was committed.
#[derive(Error, Debug)]
pub enum InstallError {
  #[error("invalid manifest entry {entry}: {source}")]
  InvalidUrl {
    entry: String,
    source: url::ParseError,
  },

  #[error("failed to fetch manifest entry: {0}")]
  Fetch(#[from] NetworkError),

  #[error("manifest entry {url} returned status {status}")]
  BadStatus { url: String, status: u16 },

  #[error(transparent)]
  Storage(#[from] CacheError),
}

/// Staging database failures. `Open` covers connect and schema creation,
/// `Write` an append that did not commit.
#[derive(Error, Debug)]
pub enum DbError {
  #[error("failed to open staging database at {path}: {source}")]
  Open {
    path: String,
    source: rusqlite::Error,
  },

  #[error("failed to create staging directory: {0}")]
  Directory(#[from] std::io::Error),

  #[error("failed to write staged record: {0}")]
  Write(rusqlite::Error),

  #[error("staging query failed: {0}")]
  Query(#[from] rusqlite::Error),

  #[error("staging database is at version {found}, newer than requested {requested}")]
  Version { found: u32, requested: u32 },

  #[error("staging database unavailable: {0}")]
  Unavailable(String),

  #[error("staging lock poisoned")]
  Poisoned,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeofenceError {
  #[error("geofencing is not supported on this platform")]
  Unsupported,

  #[error("geofence platform call failed: {0}")]
  Platform(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("unrecognised message: {0}")]
  Decode(#[from] serde_json::Error),
}
