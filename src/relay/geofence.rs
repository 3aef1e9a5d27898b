//! The platform's geofencing capability.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GeofenceError;

/// A named circular region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeofenceRegion {
  pub name: String,
  pub latitude: f64,
  pub longitude: f64,
  pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
  pub id: u64,
  pub region: GeofenceRegion,
}

/// Register/unregister/query contract of the platform geofencing API.
///
/// Callers must check [`GeofencePlatform::is_supported`] first; an
/// unsupported platform answers every call with [`GeofenceError::Unsupported`].
#[async_trait]
pub trait GeofencePlatform: Send + Sync {
  fn is_supported(&self) -> bool;

  async fn registrations(&self) -> Result<Vec<Registration>, GeofenceError>;

  async fn remove(&self, id: u64) -> Result<(), GeofenceError>;

  async fn add(&self, region: GeofenceRegion) -> Result<Registration, GeofenceError>;
}

/// Platform without geofencing.
pub struct Unsupported;

#[async_trait]
impl GeofencePlatform for Unsupported {
  fn is_supported(&self) -> bool {
    false
  }

  async fn registrations(&self) -> Result<Vec<Registration>, GeofenceError> {
    Err(GeofenceError::Unsupported)
  }

  async fn remove(&self, _id: u64) -> Result<(), GeofenceError> {
    Err(GeofenceError::Unsupported)
  }

  async fn add(&self, _region: GeofenceRegion) -> Result<Registration, GeofenceError> {
    Err(GeofenceError::Unsupported)
  }
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  registrations: Vec<Registration>,
}

/// Registrations kept in process. Crossings are reported by the host, which
/// owns the location source.
#[derive(Default)]
pub struct InMemoryGeofencing {
  registry: Mutex<Registry>,
}

impl InMemoryGeofencing {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl GeofencePlatform for InMemoryGeofencing {
  fn is_supported(&self) -> bool {
    true
  }

  async fn registrations(&self) -> Result<Vec<Registration>, GeofenceError> {
    let registry = self
      .registry
      .lock()
      .map_err(|e| GeofenceError::Platform(e.to_string()))?;
    Ok(registry.registrations.clone())
  }

  async fn remove(&self, id: u64) -> Result<(), GeofenceError> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| GeofenceError::Platform(e.to_string()))?;
    registry.registrations.retain(|r| r.id != id);
    Ok(())
  }

  async fn add(&self, region: GeofenceRegion) -> Result<Registration, GeofenceError> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| GeofenceError::Platform(e.to_string()))?;
    registry.next_id += 1;
    let registration = Registration {
      id: registry.next_id,
      region,
    };
    registry.registrations.push(registration.clone());
    Ok(registration)
  }
}
