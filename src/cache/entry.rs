//! Types stored in and returned by the asset cache.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::net::{RequestKey, Response, ResponseKind};

/// Lifecycle state of one cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Fully populated from the manifest, not yet serving
  Installed,
  /// Serving traffic
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installed => "installed",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "installed" => Some(Self::Installed),
      "active" => Some(Self::Active),
      _ => None,
    }
  }
}

/// One named cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub name: String,
  pub state: GenerationState,
  pub entries: usize,
}

/// A response snapshot held by a generation.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
  pub fn into_response(self) -> Response {
    Response::new(self.status, self.kind, self.headers, self.body)
  }
}
