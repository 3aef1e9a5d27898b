//! Connected foreground instances.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::messages::OutboundMessage;

struct Client {
  tx: mpsc::UnboundedSender<OutboundMessage>,
  controlled: bool,
}

#[derive(Default)]
struct Inner {
  clients: BTreeMap<String, Client>,
  claimed: bool,
}

/// Registry of live foreground instances, cheap to clone.
#[derive(Clone, Default)]
pub struct ClientRegistry {
  inner: Arc<Mutex<Inner>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a client and return the receiving end of its message channel.
  /// Reconnecting with the same id replaces the old channel.
  pub fn connect(&self, id: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Ok(mut inner) = self.inner.lock() {
      let controlled = inner.claimed;
      inner
        .clients
        .insert(id.to_string(), Client { tx, controlled });
    }
    debug!(client = id, "client connected");
    rx
  }

  pub fn disconnect(&self, id: &str) -> bool {
    self
      .inner
      .lock()
      .map(|mut inner| inner.clients.remove(id).is_some())
      .unwrap_or(false)
  }

  /// Take control of every connected client, and of clients that connect later.
  pub fn claim(&self) -> usize {
    let Ok(mut inner) = self.inner.lock() else {
      return 0;
    };
    inner.claimed = true;
    for client in inner.clients.values_mut() {
      client.controlled = true;
    }
    inner.clients.len()
  }

  #[cfg(test)]
  pub fn is_controlled(&self, id: &str) -> bool {
    self
      .inner
      .lock()
      .map(|inner| inner.clients.get(id).is_some_and(|c| c.controlled))
      .unwrap_or(false)
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.inner.lock().map(|i| i.clients.len()).unwrap_or(0)
  }

  /// Send a message to every controlled client, dropping clients whose
  /// receiver is gone. Uncontrolled clients are skipped until a claim.
  /// Returns how many received it.
  pub fn broadcast(&self, message: &OutboundMessage) -> usize {
    let Ok(mut inner) = self.inner.lock() else {
      return 0;
    };
    let mut delivered = 0;
    inner.clients.retain(|id, client| {
      let sent = if client.controlled {
        client.tx.send(message.clone()).is_ok()
      } else {
        !client.tx.is_closed()
      };
      if !sent {
        debug!(client = %id, "pruning closed client");
        return false;
      }
      if client.controlled {
        delivered += 1;
      }
      true
    });
    delivered
  }
}
