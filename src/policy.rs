//! Per-request interception: decides between network-only and cache-first,
//! and applies the offline navigation fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, VersionedCache};
use crate::error::NetworkError;
use crate::net::{Fetcher, Request, RequestKey, Response, ResponseKind};

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  /// Straight to the network, cache never consulted
  Bypass,
  /// Served from the current cache generation
  Cache,
  /// Fetched after a cache miss
  Network,
  /// Network failed on a navigation, app shell served instead
  Fallback,
}

impl Source {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Bypass => "bypass",
      Self::Cache => "cache",
      Self::Network => "network",
      Self::Fallback => "fallback",
    }
  }
}

#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: Source,
}

impl Served {
  fn new(response: Response, source: Source) -> Self {
    Self { response, source }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
  NetworkOnly,
  CacheFirst,
}

/// Rules the policy is built from.
#[derive(Debug, Clone)]
pub struct PolicyRules {
  /// Hostname substrings of the remote API; matching requests never touch the cache
  pub api_hosts: Vec<String>,
  /// When false only GET requests are cached; everything else is network-only
  pub cache_non_get_requests: bool,
  /// Cached document served when a navigation cannot reach the network
  pub shell: Url,
}

pub struct InterceptionPolicy<S: CacheStorage> {
  cache: VersionedCache<S>,
  fetcher: Arc<dyn Fetcher>,
  api_hosts: Vec<String>,
  cache_non_get: bool,
  shell: RequestKey,
}

impl<S: CacheStorage> InterceptionPolicy<S> {
  pub fn new(cache: VersionedCache<S>, fetcher: Arc<dyn Fetcher>, rules: PolicyRules) -> Self {
    Self {
      cache,
      fetcher,
      api_hosts: rules.api_hosts,
      cache_non_get: rules.cache_non_get_requests,
      shell: RequestKey::new("GET", &rules.shell),
    }
  }

  /// True if the URL's host contains any configured API host.
  pub fn is_excluded(&self, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
      return false;
    };
    self
      .api_hosts
      .iter()
      .any(|api| !api.is_empty() && host.contains(api.as_str()))
  }

  fn strategy(&self, request: &Request) -> Strategy {
    if self.is_excluded(&request.url) {
      Strategy::NetworkOnly
    } else if !request.is_get() && !self.cache_non_get {
      Strategy::NetworkOnly
    } else {
      Strategy::CacheFirst
    }
  }

  /// Answer an intercepted request.
  pub async fn handle(&self, request: &Request) -> Result<Served, NetworkError> {
    match self.strategy(request) {
      Strategy::NetworkOnly => {
        debug!(method = %request.method, url = %request.url, "bypassing cache");
        let response = self.fetcher.fetch(request).await?;
        Ok(Served::new(response, Source::Bypass))
      }
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Served, NetworkError> {
    let key = request.identity();

    if let Some(entry) = self.cache.lookup(&key) {
      debug!(url = %entry.key.url, cached_at = %entry.cached_at, "serving from cache");
      return Ok(Served::new(entry.into_response(), Source::Cache));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) if is_cacheable(&response) => {
        let (response, copy) = response.duplicate();
        if let Err(e) = self.cache.store(&key, copy) {
          warn!(url = %key.url, error = %e, "failed to cache response");
        }
        Ok(Served::new(response, Source::Network))
      }
      Ok(response) => Ok(Served::new(response, Source::Network)),
      Err(e) if request.is_navigation() => match self.cache.lookup(&self.shell) {
        Some(shell) => {
          info!(url = %request.url, error = %e, "offline navigation, serving app shell");
          Ok(Served::new(shell.into_response(), Source::Fallback))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }
}

/// Only plain 200 same-origin responses are worth keeping.
fn is_cacheable(response: &Response) -> bool {
  response.status == 200 && response.kind == ResponseKind::Basic
}
