use std::collections::BTreeMap;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::net::{Request, RequestMode};
use crate::relay::GeofenceEvent;

/// Everything the worker reacts to. Each variant maps to one handler.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch {
    id: String,
    request: Request,
  },
  Connect {
    client: String,
  },
  Disconnect {
    client: String,
  },
  /// Message posted by a foreground client, with an optional reply port
  Message {
    client: String,
    data: serde_json::Value,
    reply: Option<String>,
  },
  GeofenceEnter(GeofenceEvent),
  GeofenceLeave(GeofenceEvent),
  Sync {
    tag: String,
  },
}

/// One line of the host protocol, as written by the embedding platform.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum HostEvent {
  Install,
  Activate,
  Fetch {
    id: String,
    url: Url,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    mode: RequestMode,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Request body as text
    #[serde(default)]
    body: Option<String>,
  },
  Connect {
    client: String,
  },
  Disconnect {
    client: String,
  },
  Message {
    client: String,
    data: serde_json::Value,
    #[serde(default)]
    reply: Option<String>,
  },
  GeofenceEnter {
    geofence: String,
  },
  GeofenceLeave {
    geofence: String,
  },
  Sync {
    tag: String,
  },
}

impl From<HostEvent> for WorkerEvent {
  fn from(event: HostEvent) -> Self {
    match event {
      HostEvent::Install => Self::Install,
      HostEvent::Activate => Self::Activate,
      HostEvent::Fetch {
        id,
        url,
        method,
        mode,
        headers,
        body,
      } => {
        let mut request = Request::get(url).with_method(method.as_deref().unwrap_or("GET"));
        request.mode = mode;
        for (name, value) in headers {
          request = request.with_header(name, value);
        }
        if let Some(body) = body {
          request = request.with_body(body);
        }
        Self::Fetch { id, request }
      }
      HostEvent::Connect { client } => Self::Connect { client },
      HostEvent::Disconnect { client } => Self::Disconnect { client },
      HostEvent::Message {
        client,
        data,
        reply,
      } => Self::Message {
        client,
        data,
        reply,
      },
      HostEvent::GeofenceEnter { geofence } => Self::GeofenceEnter(GeofenceEvent { geofence }),
      HostEvent::GeofenceLeave { geofence } => Self::GeofenceLeave(GeofenceEvent { geofence }),
      HostEvent::Sync { tag } => Self::Sync { tag },
    }
  }
}

/// Parse a single protocol line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<WorkerEvent, serde_json::Error>> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }
  Some(serde_json::from_str::<HostEvent>(line).map(WorkerEvent::from))
}

/// Event handler that produces worker events from line-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventHandler {
  /// Spawn a reader over `input`. The stream of events ends at EOF.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read host input");
            break;
          }
        };

        match parse_line(&line) {
          Some(Ok(event)) => {
            if tx.send(event).is_err() {
              break;
            }
          }
          Some(Err(e)) => warn!(error = %e, line = %line, "skipping unrecognised host event"),
          None => {}
        }
      }
      debug!("host input closed");
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_fetch_defaults_to_get() {
    let event = parse_line(r#"{"event":"fetch","id":"1","url":"http://app.test/app.js"}"#)
      .unwrap()
      .unwrap();
    match event {
      WorkerEvent::Fetch { id, request } => {
        assert_eq!(id, "1");
        assert!(request.is_get());
        assert!(!request.is_navigation());
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_parse_navigation_post() {
    let event = parse_line(
      r#"{"event":"fetch","id":"2","url":"http://app.test/","method":"post","mode":"navigate"}"#,
    )
    .unwrap()
    .unwrap();
    let WorkerEvent::Fetch { request, .. } = event else {
      panic!("expected fetch");
    };
    assert_eq!(request.method, "POST");
    assert!(request.is_navigation());
  }

  #[test]
  fn test_parse_fetch_carries_headers_and_body() {
    let event = parse_line(
      r#"{"event":"fetch","id":"3","url":"https://abc.supabase.co/rest/v1/ritase","method":"POST","headers":{"apikey":"anon","content-type":"application/json"},"body":"{\"jam\":7}"}"#,
    )
    .unwrap()
    .unwrap();
    let WorkerEvent::Fetch { request, .. } = event else {
      panic!("expected fetch");
    };
    assert_eq!(
      request.headers,
      vec![
        ("apikey".to_string(), "anon".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
      ]
    );
    assert_eq!(request.body.as_deref(), Some(&b"{\"jam\":7}"[..]));
  }

  #[test]
  fn test_parse_geofence_and_message() {
    assert_eq!(
      parse_line(r#"{"event":"geofence_leave","geofence":"muatan-area"}"#)
        .unwrap()
        .unwrap(),
      WorkerEvent::GeofenceLeave(GeofenceEvent {
        geofence: "muatan-area".into()
      })
    );

    let message = parse_line(
      r#"{"event":"message","client":"tab","data":{"type":"CHECK_GEOFENCE_SUPPORT"},"reply":"p1"}"#,
    )
    .unwrap()
    .unwrap();
    assert!(matches!(message, WorkerEvent::Message { reply: Some(ref p), .. } if p == "p1"));
  }

  #[test]
  fn test_blank_and_garbage_lines() {
    assert!(parse_line("   ").is_none());
    assert!(parse_line("{not json").unwrap().is_err());
    assert!(parse_line(r#"{"event":"reboot"}"#).unwrap().is_err());
  }

  #[tokio::test]
  async fn test_handler_skips_bad_lines_and_ends_at_eof() {
    let input: &'static [u8] =
      b"{\"event\":\"install\"}\nnonsense\n\n{\"event\":\"sync\",\"tag\":\"background-sync\"}\n";
    let mut events = EventHandler::new(input);

    assert_eq!(events.next().await, Some(WorkerEvent::Install));
    assert_eq!(
      events.next().await,
      Some(WorkerEvent::Sync {
        tag: "background-sync".into()
      })
    );
    assert_eq!(events.next().await, None);
  }
}
