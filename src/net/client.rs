use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::{Origin, Url};

use crate::error::NetworkError;

use super::types::{Request, RequestMode, Response, ResponseKind};

/// The network as seen by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// reqwest-backed fetcher. Responses are tainted relative to the app origin:
/// same-origin responses are `basic`, everything else `cors`, and no-cors
/// cross-origin requests come back `opaque`.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpFetcher {
  pub fn new(app_origin: &Url, timeout: Duration) -> Result<Self, NetworkError> {
    Self::build(app_origin, reqwest::Client::builder().timeout(timeout))
  }

  fn build(app_origin: &Url, builder: reqwest::ClientBuilder) -> Result<Self, NetworkError> {
    let client = builder.build().map_err(|e| NetworkError::Unreachable {
      url: app_origin.to_string(),
      reason: format!("failed to build http client: {}", e),
    })?;

    Ok(Self {
      client,
      origin: app_origin.origin(),
    })
  }

  fn classify(&self, request: &Request, final_url: &Url) -> ResponseKind {
    if final_url.origin() == self.origin {
      ResponseKind::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseKind::Opaque
    } else {
      ResponseKind::Cors
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
      NetworkError::Unreachable {
        url: url.clone(),
        reason: format!("invalid method {}: {}", request.method, e),
      }
    })?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| map_reqwest_error(&url, e))?;

    let kind = self.classify(request, response.url());
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| map_reqwest_error(&url, e))?;

    debug!(url = %url, status, kind = kind.as_str(), "network response");

    // Opaque responses expose neither status nor body.
    if kind == ResponseKind::Opaque {
      return Ok(Response::new(0, kind, Vec::new(), bytes::Bytes::new()));
    }

    Ok(Response::new(status, kind, headers, body))
  }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout {
      url: url.to_string(),
    }
  } else {
    NetworkError::Unreachable {
      url: url.to_string(),
      reason: e.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  fn fetcher() -> HttpFetcher {
    let origin = Url::parse("http://app.test/").unwrap();
    HttpFetcher::new(&origin, Duration::from_secs(1)).unwrap()
  }

  /// Fetcher for a loopback test server, ignoring any proxy in the environment.
  fn local(origin: &Url, timeout: Duration) -> HttpFetcher {
    HttpFetcher::build(origin, reqwest::Client::builder().timeout(timeout).no_proxy()).unwrap()
  }

  async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
    (listener, origin)
  }

  /// Accept one connection, read the raw request up to `last`, answer 200 "ok".
  async fn capture_one(listener: TcpListener, last: &'static str) -> String {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
      let n = socket.read(&mut buf).await.unwrap();
      raw.extend_from_slice(&buf[..n]);
      if n == 0 || String::from_utf8_lossy(&raw).ends_with(last) {
        break;
      }
    }
    socket
      .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
      .await
      .unwrap();
    String::from_utf8_lossy(&raw).to_lowercase()
  }

  #[tokio::test]
  async fn test_forwards_headers_and_body() {
    let (listener, origin) = listen().await;
    let body = r#"{"jam":7}"#;
    let server = tokio::spawn(capture_one(listener, body));

    let request = Request::get(origin.join("rest/v1/ritase").unwrap())
      .with_method("POST")
      .with_header("apikey", "anon-key")
      .with_header("Authorization", "Bearer token")
      .with_body(body);
    let response = local(&origin, Duration::from_secs(5))
      .fetch(&request)
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.kind, ResponseKind::Basic);
    assert_eq!(response.into_body(), bytes::Bytes::from_static(b"ok"));

    let raw = server.await.unwrap();
    assert!(raw.starts_with("post /rest/v1/ritase http/1.1"));
    assert!(raw.contains("apikey: anon-key"));
    assert!(raw.contains("authorization: bearer token"));
    assert!(raw.ends_with(body));
  }

  #[tokio::test]
  async fn test_silent_server_times_out() {
    let (listener, origin) = listen().await;
    let server = tokio::spawn(async move {
      let (socket, _) = listener.accept().await.unwrap();
      tokio::time::sleep(Duration::from_secs(10)).await;
      drop(socket);
    });

    let err = local(&origin, Duration::from_millis(200))
      .fetch(&Request::get(origin.join("index.html").unwrap()))
      .await
      .unwrap_err();
    assert!(matches!(err, NetworkError::Timeout { .. }));
    server.abort();
  }

  #[test]
  fn test_same_origin_is_basic() {
    let url = Url::parse("http://app.test/js/app.js").unwrap();
    let kind = fetcher().classify(&Request::get(url.clone()), &url);
    assert_eq!(kind, ResponseKind::Basic);
  }

  #[test]
  fn test_cross_origin_tainting() {
    let url = Url::parse("https://cdn.test/lib.js").unwrap();
    let fetcher = fetcher();
    assert_eq!(
      fetcher.classify(&Request::get(url.clone()), &url),
      ResponseKind::Cors
    );

    let mut no_cors = Request::get(url.clone());
    no_cors.mode = RequestMode::NoCors;
    assert_eq!(fetcher.classify(&no_cors, &url), ResponseKind::Opaque);
  }
}
