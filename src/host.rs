//! Output side of the host protocol: everything the worker tells the
//! embedding platform, one JSON object per line.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::relay::{Notification, Notifier, OutboundMessage};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostOutput {
  Lifecycle {
    phase: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  Response {
    id: String,
    status: u16,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    /// UTF-8 (lossy) rendering of the body
    body: String,
  },
  FetchError {
    id: String,
    error: String,
  },
  ClientMessage {
    client: String,
    message: OutboundMessage,
  },
  Reply {
    port: String,
    data: serde_json::Value,
  },
  Notification {
    notification: Notification,
  },
}

/// Sending half of the host output channel, cheap to clone.
#[derive(Clone)]
pub struct Outbox {
  tx: mpsc::UnboundedSender<HostOutput>,
}

impl Outbox {
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostOutput>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  pub fn send(&self, output: HostOutput) {
    if self.tx.send(output).is_err() {
      warn!("host output closed, dropping message");
    }
  }

  /// Forward a client's relay messages to the host until the client goes away.
  pub fn forward_client(
    &self,
    client: String,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
  ) -> JoinHandle<()> {
    let outbox = self.clone();
    tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        outbox.send(HostOutput::ClientMessage {
          client: client.clone(),
          message,
        });
      }
    })
  }
}

/// Shows notifications by handing them to the host.
pub struct OutboxNotifier {
  outbox: Outbox,
}

impl OutboxNotifier {
  pub fn new(outbox: Outbox) -> Self {
    Self { outbox }
  }
}

#[async_trait]
impl Notifier for OutboxNotifier {
  async fn show(&self, notification: Notification) {
    self.outbox.send(HostOutput::Notification { notification });
  }
}

/// Write every output as a JSON line until all senders are dropped.
pub fn spawn_writer<W>(mut out: W, mut rx: mpsc::UnboundedReceiver<HostOutput>) -> JoinHandle<()>
where
  W: AsyncWrite + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    while let Some(output) = rx.recv().await {
      let mut line = match serde_json::to_vec(&output) {
        Ok(line) => line,
        Err(e) => {
          error!(error = %e, "failed to encode host output");
          continue;
        }
      };
      line.push(b'\n');

      if let Err(e) = out.write_all(&line).await {
        error!(error = %e, "failed to write host output");
        break;
      }
      if let Err(e) = out.flush().await {
        error!(error = %e, "failed to flush host output");
        break;
      }
    }
  })
}
