use async_trait::async_trait;
use serde::Serialize;

/// A user-visible notification. Notifications sharing a tag replace each
/// other instead of stacking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub tag: String,
  /// Stays until the user dismisses it
  pub require_interaction: bool,
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: Notification);
}
