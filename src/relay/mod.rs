//! Background event relay.
//!
//! Geofence crossings reported by the platform are mirrored to every
//! foreground instance the worker controls. Leaving the area additionally stages an auto-ritase
//! record and shows a notification, at most once per cooldown window.

mod clients;
mod cooldown;
mod geofence;
mod messages;
mod notify;

pub use clients::ClientRegistry;
pub use cooldown::Cooldown;
pub use geofence::{GeofencePlatform, GeofenceRegion, InMemoryGeofencing, Registration, Unsupported};
pub use messages::{GeofenceSpec, InboundMessage, OutboundMessage, SupportReply};
pub use notify::{Notification, Notifier};

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::db::{iso_timestamp, RecordSink, StagedRecord};
use crate::error::GeofenceError;

/// A boundary crossing reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeofenceEvent {
  /// Name of the registration that fired
  pub geofence: String,
}

/// What happened to the staging side of a leave event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staging {
  /// Record committed under this key
  Recorded(i64),
  /// Inside the cooldown window, nothing written
  Suppressed,
  /// Write failed; the record is lost
  Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
  pub delivered: usize,
  pub staging: Staging,
}

/// Result of a registration request. Never an error: failures are logged.
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceOutcome {
  Registered(Registration),
  Cleared(usize),
  Unsupported,
  Failed(GeofenceError),
}

/// Collaborators and settings the relay is built from.
pub struct RelayContext {
  pub clients: ClientRegistry,
  pub platform: Arc<dyn GeofencePlatform>,
  pub staging: Arc<dyn RecordSink>,
  pub notifier: Arc<dyn Notifier>,
  pub cooldown: Cooldown,
  /// Name given to the single registered region
  pub region_name: String,
  pub notification: Notification,
}

pub struct Relay {
  ctx: RelayContext,
}

impl Relay {
  pub fn new(ctx: RelayContext) -> Self {
    Self { ctx }
  }

  pub fn clients(&self) -> &ClientRegistry {
    &self.ctx.clients
  }

  pub fn on_enter(&self, event: &GeofenceEvent) -> usize {
    info!(geofence = %event.geofence, "geofence enter");
    self.ctx.clients.broadcast(&OutboundMessage::GeofenceEnter {
      timestamp: iso_timestamp(Utc::now()),
      geofence: event.geofence.clone(),
    })
  }

  pub async fn on_leave(&self, event: &GeofenceEvent) -> LeaveOutcome {
    info!(geofence = %event.geofence, "geofence leave");
    let delivered = self.ctx.clients.broadcast(&OutboundMessage::GeofenceLeave {
      timestamp: iso_timestamp(Utc::now()),
      geofence: event.geofence.clone(),
    });

    if !self.ctx.cooldown.try_trigger(Instant::now()) {
      info!(
        geofence = %event.geofence,
        window_secs = self.ctx.cooldown.window().as_secs(),
        "within cooldown, not recording ritase"
      );
      return LeaveOutcome {
        delivered,
        staging: Staging::Suppressed,
      };
    }

    let record = StagedRecord::auto_ritase(event.geofence.clone(), Utc::now());
    let staging = match self.ctx.staging.append(&record) {
      Ok(key) => {
        info!(key, geofence = %record.geofence, "ritase staged for sync");
        Staging::Recorded(key)
      }
      Err(e) => {
        error!(error = %e, "failed to stage background ritase");
        Staging::Failed
      }
    };

    self.ctx.notifier.show(self.ctx.notification.clone()).await;

    LeaveOutcome { delivered, staging }
  }

  pub fn check_support(&self) -> bool {
    self.ctx.platform.is_supported()
  }

  /// Replace every registration with a single region.
  pub async fn register_geofence(&self, spec: GeofenceSpec) -> GeofenceOutcome {
    if !self.check_support() {
      warn!("geofencing not supported, ignoring registration");
      return GeofenceOutcome::Unsupported;
    }

    let region = GeofenceRegion {
      name: self.ctx.region_name.clone(),
      latitude: spec.latitude,
      longitude: spec.longitude,
      radius: spec.radius,
    };

    let result = async {
      self.clear_registrations().await?;
      self.ctx.platform.add(region).await
    }
    .await;

    match result {
      Ok(registration) => {
        info!(
          id = registration.id,
          name = %registration.region.name,
          "geofence registered for background monitoring"
        );
        GeofenceOutcome::Registered(registration)
      }
      Err(e) => {
        error!(error = %e, "failed to register geofence");
        GeofenceOutcome::Failed(e)
      }
    }
  }

  /// Remove every registration. A no-op when there are none.
  pub async fn unregister_geofence(&self) -> GeofenceOutcome {
    if !self.check_support() {
      return GeofenceOutcome::Unsupported;
    }

    match self.clear_registrations().await {
      Ok(removed) => {
        info!(removed, "geofences removed");
        GeofenceOutcome::Cleared(removed)
      }
      Err(e) => {
        error!(error = %e, "failed to remove geofences");
        GeofenceOutcome::Failed(e)
      }
    }
  }

  async fn clear_registrations(&self) -> Result<usize, GeofenceError> {
    let registrations = self.ctx.platform.registrations().await?;
    for registration in &registrations {
      self.ctx.platform.remove(registration.id).await?;
    }
    Ok(registrations.len())
  }

  /// Handle a foreground message. Only `CHECK_GEOFENCE_SUPPORT` produces a reply.
  pub async fn handle_message(&self, message: InboundMessage) -> Option<SupportReply> {
    match message {
      InboundMessage::RegisterGeofence { geofence } => {
        self.register_geofence(geofence).await;
        None
      }
      InboundMessage::UnregisterGeofence => {
        self.unregister_geofence().await;
        None
      }
      InboundMessage::CheckGeofenceSupport => Some(SupportReply {
        supported: self.check_support(),
      }),
    }
  }
}
