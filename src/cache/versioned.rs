//! The versioned asset cache: one generation per deploy, populated from the
//! manifest on install and made exclusive on activate.

use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, InstallError};
use crate::net::{Fetcher, Request, RequestKey, Response};

use super::entry::{CachedEntry, GenerationState};
use super::storage::CacheStorage;

/// Lifecycle of this process's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Uninstalled,
  Installed,
  Active,
}

/// Outcome of an activation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Activation {
  /// Stale generations that were deleted
  pub purged: Vec<String>,
  /// Stale generations whose deletion failed and were left behind
  pub failed: Vec<String>,
}

/// Cache bound to a single version name over a shared storage backend.
///
/// Other versions may exist in the same backend; they are only touched by
/// [`VersionedCache::activate`], which deletes them.
pub struct VersionedCache<S: CacheStorage> {
  storage: Arc<S>,
  version: String,
  origin: Url,
  lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<S: CacheStorage> VersionedCache<S> {
  pub fn new(storage: Arc<S>, version: impl Into<String>, origin: Url) -> Self {
    Self {
      storage,
      version: version.into(),
      origin,
      lifecycle: Arc::new(Mutex::new(Lifecycle::Uninstalled)),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self
      .lifecycle
      .lock()
      .map(|l| *l)
      .unwrap_or(Lifecycle::Uninstalled)
  }

  fn set_lifecycle(&self, next: Lifecycle) {
    if let Ok(mut lifecycle) = self.lifecycle.lock() {
      *lifecycle = next;
    }
  }

  /// Resolve a manifest entry (usually relative, e.g. `./index.html`) against the app origin.
  pub fn resolve(&self, entry: &str) -> Result<Url, InstallError> {
    self
      .origin
      .join(entry)
      .map_err(|source| InstallError::InvalidUrl {
        entry: entry.to_string(),
        source,
      })
  }

  /// Fetch every manifest entry and commit them as this version's generation.
  ///
  /// All fetches must succeed with a 2xx status before anything is written,
  /// so a failed install never leaves a populated generation behind. An
  /// active generation stays active across a re-install.
  pub async fn install<F: Fetcher + ?Sized>(
    &self,
    fetcher: &F,
    manifest: &[String],
  ) -> Result<(), InstallError> {
    let requests = manifest
      .iter()
      .map(|entry| self.resolve(entry).map(Request::get))
      .collect::<Result<Vec<_>, _>>()?;

    info!(cache = %self.version, entries = requests.len(), "installing cache");

    let entries = try_join_all(requests.into_iter().map(|request| async move {
      let response = fetcher.fetch(&request).await?;
      if !response.is_ok() {
        return Err(InstallError::BadStatus {
          url: request.url.to_string(),
          status: response.status,
        });
      }
      Ok((request.identity(), response))
    }))
    .await?;

    // Re-installing a generation that is already serving refreshes its
    // entries but keeps it active.
    let (state, lifecycle) = match self.lifecycle() {
      Lifecycle::Active => (GenerationState::Active, Lifecycle::Active),
      _ => (GenerationState::Installed, Lifecycle::Installed),
    };
    self
      .storage
      .commit_generation(&self.version, state, entries)?;
    self.set_lifecycle(lifecycle);

    info!(cache = %self.version, "all resources cached");
    Ok(())
  }

  /// Delete every generation other than this one and mark this one active.
  ///
  /// Never fails: storage errors are logged and the affected generation is
  /// reported in [`Activation::failed`].
  pub fn activate(&self) -> Activation {
    let mut activation = Activation::default();

    match self.storage.generations() {
      Ok(generations) => {
        for generation in generations.into_iter().filter(|g| g.name != self.version) {
          info!(cache = %generation.name, "deleting old cache");
          match self.storage.delete_generation(&generation.name) {
            Ok(_) => activation.purged.push(generation.name),
            Err(e) => {
              warn!(cache = %generation.name, error = %e, "failed to delete old cache");
              activation.failed.push(generation.name);
            }
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to enumerate caches"),
    }

    if let Err(e) = self
      .storage
      .set_state(&self.version, GenerationState::Active)
    {
      warn!(cache = %self.version, error = %e, "failed to mark cache active");
    }
    self.set_lifecycle(Lifecycle::Active);

    info!(cache = %self.version, purged = activation.purged.len(), "cache activated");
    activation
  }

  /// Exact-match lookup in this version's generation.
  pub fn lookup(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.get_entry(&self.version, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %key.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Insert or overwrite an entry in this version's generation.
  pub fn store(&self, key: &RequestKey, response: Response) -> Result<(), CacheError> {
    debug!(cache = %self.version, url = %key.url, "caching response");
    self.storage.put_entry(&self.version, key, response)
  }
}

impl<S: CacheStorage> Clone for VersionedCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      version: self.version.clone(),
      origin: self.origin.clone(),
      lifecycle: Arc::clone(&self.lifecycle),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::entry::Generation;
  use crate::net::ResponseKind;
  use crate::testing::{url, FakeFetcher, ORIGIN};
  use bytes::Bytes;

  fn manifest(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|s| s.to_string()).collect()
  }

  fn cache(storage: &Arc<SqliteStorage>, version: &str) -> VersionedCache<SqliteStorage> {
    VersionedCache::new(Arc::clone(storage), version, Url::parse(ORIGIN).unwrap())
  }

  /// Storage whose deletes always fail, wrapping a working backend.
  struct StuckDeletes(SqliteStorage);

  impl CacheStorage for StuckDeletes {
    fn commit_generation(
      &self,
      name: &str,
      state: GenerationState,
      entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
      self.0.commit_generation(name, state, entries)
    }
    fn generations(&self) -> Result<Vec<Generation>, CacheError> {
      self.0.generations()
    }
    fn set_state(&self, name: &str, state: GenerationState) -> Result<(), CacheError> {
      self.0.set_state(name, state)
    }
    fn delete_generation(&self, _name: &str) -> Result<bool, CacheError> {
      Err(CacheError::Poisoned)
    }
    fn get_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
      self.0.get_entry(name, key)
    }
    fn put_entry(&self, name: &str, key: &RequestKey, response: Response) -> Result<(), CacheError> {
      self.0.put_entry(name, key, response)
    }
  }

  #[tokio::test]
  async fn test_install_populates_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new().ok("./index.html", "shell").ok("./app.js", "js");
    let cache = cache(&storage, "v1");

    assert_eq!(cache.lifecycle(), Lifecycle::Uninstalled);
    cache
      .install(&fetcher, &manifest(&["./index.html", "./app.js"]))
      .await
      .unwrap();
    assert_eq!(cache.lifecycle(), Lifecycle::Installed);

    let entry = cache
      .lookup(&RequestKey::new("GET", &url("./app.js")))
      .unwrap();
    assert_eq!(entry.body, Bytes::from_static(b"js"));
  }

  #[tokio::test]
  async fn test_install_fails_atomically_on_404() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new()
      .ok("./index.html", "shell")
      .route(&url("./app.js"), 404, ResponseKind::Basic, "missing");
    let cache = cache(&storage, "v1");

    let err = cache
      .install(&fetcher, &manifest(&["./index.html", "./app.js"]))
      .await
      .unwrap_err();

    assert!(matches!(err, InstallError::BadStatus { status: 404, .. }));
    assert_eq!(cache.lifecycle(), Lifecycle::Uninstalled);
    assert!(storage.generations().unwrap().is_empty());
    assert!(cache
      .lookup(&RequestKey::new("GET", &url("./index.html")))
      .is_none());
  }

  #[tokio::test]
  async fn test_install_fails_when_network_is_down() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new().ok("./index.html", "shell");
    fetcher.set_offline(true);

    let err = cache(&storage, "v1")
      .install(&fetcher, &manifest(&["./index.html"]))
      .await
      .unwrap_err();
    assert!(matches!(err, InstallError::Fetch(_)));
    assert!(storage.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_version() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new().ok("./index.html", "shell");
    let entries = manifest(&["./index.html"]);

    let v1 = cache(&storage, "v1");
    v1.install(&fetcher, &entries).await.unwrap();
    v1.activate();

    let v2 = cache(&storage, "v2");
    v2.install(&fetcher, &entries).await.unwrap();

    // Old generation keeps serving until the new one activates.
    assert!(v1
      .lookup(&RequestKey::new("GET", &url("./index.html")))
      .is_some());

    let activation = v2.activate();
    assert_eq!(activation.purged, vec!["v1".to_string()]);

    let generations = storage.generations().unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].name, "v2");
    assert_eq!(generations[0].state, GenerationState::Active);
    assert_eq!(v2.lifecycle(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn test_reinstall_keeps_active_generation_serving() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new().ok("./index.html", "shell v1");
    let entries = manifest(&["./index.html"]);
    let cache = cache(&storage, "v1");

    cache.install(&fetcher, &entries).await.unwrap();
    cache.activate();

    fetcher.set_route(&url("./index.html"), 200, ResponseKind::Basic, "shell v1.1");
    cache.install(&fetcher, &entries).await.unwrap();

    assert_eq!(cache.lifecycle(), Lifecycle::Active);
    assert_eq!(storage.generations().unwrap()[0].state, GenerationState::Active);
    let entry = cache
      .lookup(&RequestKey::new("GET", &url("./index.html")))
      .unwrap();
    assert_eq!(entry.body, Bytes::from_static(b"shell v1.1"));
  }

  #[tokio::test]
  async fn test_activate_skips_failed_deletions() {
    let storage = Arc::new(StuckDeletes(SqliteStorage::open_in_memory().unwrap()));
    let fetcher = FakeFetcher::new().ok("./index.html", "shell");
    let entries = manifest(&["./index.html"]);
    let origin = Url::parse(ORIGIN).unwrap();

    let old = VersionedCache::new(Arc::clone(&storage), "v1", origin.clone());
    old.install(&fetcher, &entries).await.unwrap();
    let new = VersionedCache::new(Arc::clone(&storage), "v2", origin);
    new.install(&fetcher, &entries).await.unwrap();

    let activation = new.activate();
    assert!(activation.purged.is_empty());
    assert_eq!(activation.failed, vec!["v1".to_string()]);
    assert_eq!(new.lifecycle(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn test_lookup_survives_network_loss() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = FakeFetcher::new().ok("./index.html", "shell v1");
    let cache = cache(&storage, "v1");
    cache
      .install(&fetcher, &manifest(&["./index.html"]))
      .await
      .unwrap();

    fetcher.set_offline(true);
    let entry = cache
      .lookup(&RequestKey::new("GET", &url("./index.html")))
      .unwrap();
    assert_eq!(entry.body, Bytes::from_static(b"shell v1"));
  }

  #[test]
  fn test_resolve_rejects_garbage() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = cache(&storage, "v1");
    assert_eq!(cache.resolve("./icon.png").unwrap(), url("./icon.png"));
    assert!(matches!(
      cache.resolve("http://[::1"),
      Err(InstallError::InvalidUrl { .. })
    ));
  }
}
