//! Test doubles for the network, the geofence platform and notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::{GeofenceError, NetworkError};
use crate::net::{Fetcher, Request, Response, ResponseKind};
use crate::relay::{GeofencePlatform, GeofenceRegion, Notification, Notifier, Registration};

pub const ORIGIN: &str = "http://app.test/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
struct Canned {
  status: u16,
  kind: ResponseKind,
  body: &'static str,
}

/// Network fake serving canned responses by absolute URL. Unknown URLs and
/// everything while offline fail with `Unreachable`; while stalled every
/// request fails with `Timeout`.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Canned>>,
  offline: AtomicBool,
  stalled: AtomicBool,
  requests: Mutex<Vec<Request>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &Url, status: u16, kind: ResponseKind, body: &'static str) -> Self {
    self.set_route(url, status, kind, body);
    self
  }

  pub fn ok(self, path: &str, body: &'static str) -> Self {
    self.route(&url(path), 200, ResponseKind::Basic, body)
  }

  pub fn set_route(&self, url: &Url, status: u16, kind: ResponseKind, body: &'static str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Canned { status, kind, body });
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_stalled(&self, stalled: bool) {
    self.stalled.store(stalled, Ordering::SeqCst);
  }

  /// URLs fetched so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| r.url.to_string())
      .collect()
  }

  /// Every request as it reached the network.
  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    self.requests.lock().unwrap().push(request.clone());

    if self.stalled.load(Ordering::SeqCst) {
      return Err(NetworkError::Timeout { url });
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Unreachable {
        url,
        reason: "offline".into(),
      });
    }

    match self.routes.lock().unwrap().get(&url).cloned() {
      Some(canned) => Ok(Response::new(
        canned.status,
        canned.kind,
        vec![("content-type".into(), "text/plain".into())],
        Bytes::from_static(canned.body.as_bytes()),
      )),
      None => Err(NetworkError::Unreachable {
        url,
        reason: "no route".into(),
      }),
    }
  }
}

/// Platform that claims support but fails every call.
pub struct BrokenGeofencing;

#[async_trait]
impl GeofencePlatform for BrokenGeofencing {
  fn is_supported(&self) -> bool {
    true
  }

  async fn registrations(&self) -> Result<Vec<Registration>, GeofenceError> {
    Err(GeofenceError::Platform("permission denied".into()))
  }

  async fn remove(&self, _id: u64) -> Result<(), GeofenceError> {
    Err(GeofenceError::Platform("permission denied".into()))
  }

  async fn add(&self, _region: GeofenceRegion) -> Result<Registration, GeofenceError> {
    Err(GeofenceError::Platform("permission denied".into()))
  }
}

/// Notifier that records what it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn show(&self, notification: Notification) {
    self.shown.lock().unwrap().push(notification);
  }
}
