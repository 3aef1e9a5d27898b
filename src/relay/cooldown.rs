use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between two staged exit records.
///
/// `try_trigger` is synchronous so the check and the update can never be
/// separated by a suspension point.
pub struct Cooldown {
  window: Duration,
  last: Mutex<Option<Instant>>,
}

impl Cooldown {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      last: Mutex::new(None),
    }
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// Returns true and records `now` if more than the window has passed
  /// since the last successful trigger.
  pub fn try_trigger(&self, now: Instant) -> bool {
    let Ok(mut last) = self.last.lock() else {
      return false;
    };
    let elapsed = match *last {
      Some(previous) => now.saturating_duration_since(previous) > self.window,
      None => true,
    };
    if elapsed {
      *last = Some(now);
    }
    elapsed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_first_trigger_always_fires() {
    let cooldown = Cooldown::new(Duration::from_secs(30));
    assert!(cooldown.try_trigger(Instant::now()));
  }

  #[test]
  fn test_window_is_exclusive() {
    let cooldown = Cooldown::new(Duration::from_secs(30));
    let start = Instant::now();
    assert!(cooldown.try_trigger(start));
    assert!(!cooldown.try_trigger(start + Duration::from_secs(20)));
    assert!(!cooldown.try_trigger(start + Duration::from_secs(30)));
    assert!(cooldown.try_trigger(start + Duration::from_millis(30_001)));
  }

  #[test]
  fn test_suppressed_trigger_does_not_extend_window() {
    let cooldown = Cooldown::new(Duration::from_secs(30));
    let start = Instant::now();
    assert!(cooldown.try_trigger(start));
    assert!(!cooldown.try_trigger(start + Duration::from_secs(25)));
    assert!(cooldown.try_trigger(start + Duration::from_secs(31)));
  }
}
