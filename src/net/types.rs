//! Request and response model shared by the cache, the policy and the fetcher.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  #[default]
  SameOrigin,
  NoCors,
  Cors,
}

/// Response tainting, as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin, fully readable
  Basic,
  /// Cross-origin with CORS, readable but not ours
  Cors,
  /// Cross-origin without CORS, status and body hidden
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "basic" => Self::Basic,
      "cors" => Self::Cors,
      _ => Self::Opaque,
    }
  }
}

/// An intercepted request. Headers and body are forwarded untouched when
/// the request goes to the network; neither is part of the cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::default(),
      headers: Vec::new(),
      body: None,
    }
  }

  #[cfg(test)]
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn identity(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized request identity used as the cache key: upper-cased method
/// plus the URL with its fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url: url.into(),
    }
  }

  /// Stable, fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response whose body can be read once. Use [`Response::duplicate`] to
/// obtain a second handle before handing one away.
#[derive(Debug)]
pub struct Response {
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: Vec<(String, String)>,
  body: Bytes,
}

impl Response {
  pub fn new(status: u16, kind: ResponseKind, headers: Vec<(String, String)>, body: Bytes) -> Self {
    Self {
      status,
      kind,
      headers,
      body,
    }
  }

  /// Split into two independent handles over the same body.
  pub fn duplicate(self) -> (Response, Response) {
    let copy = Response {
      status: self.status,
      kind: self.kind,
      headers: self.headers.clone(),
      body: self.body.clone(),
    };
    (self, copy)
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn into_body(self) -> Bytes {
    self.body
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_drops_fragment_and_uppercases_method() {
    let url = Url::parse("http://app.test/index.html#top").unwrap();
    let key = RequestKey::new("get", &url);
    assert_eq!(key.method, "GET");
    assert_eq!(key.url, "http://app.test/index.html");
  }

  #[test]
  fn test_identity_ignores_headers_and_body() {
    let url = Url::parse("http://app.test/app.js").unwrap();
    let plain = Request::get(url.clone());
    let dressed = Request::get(url)
      .with_header("apikey", "secret")
      .with_body("payload");
    assert_eq!(plain.identity(), dressed.identity());
    assert_eq!(dressed.body, Some(Bytes::from_static(b"payload")));
  }

  #[test]
  fn test_digest_differs_by_method() {
    let url = Url::parse("http://app.test/api").unwrap();
    assert_ne!(
      RequestKey::new("GET", &url).digest(),
      RequestKey::new("POST", &url).digest()
    );
  }

  #[test]
  fn test_duplicate_yields_independent_bodies() {
    let response = Response::new(200, ResponseKind::Basic, vec![], Bytes::from_static(b"shell"));
    let (a, b) = response.duplicate();
    assert_eq!(a.into_body(), Bytes::from_static(b"shell"));
    assert_eq!(b.status, 200);
    assert_eq!(b.into_body(), Bytes::from_static(b"shell"));
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new(
      200,
      ResponseKind::Basic,
      vec![("Content-Type".into(), "text/html".into())],
      Bytes::new(),
    );
    assert_eq!(response.header("content-type"), Some("text/html"));
  }
}
