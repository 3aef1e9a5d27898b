use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStorage, Lifecycle, SqliteStorage, VersionedCache};
use crate::config::Config;
use crate::db::{RecordSink, StagingStore, Unavailable};
use crate::error::{DbError, InstallError, NetworkError};
use crate::event::{EventHandler, WorkerEvent};
use crate::host::{HostOutput, Outbox, OutboxNotifier};
use crate::net::{Fetcher, HttpFetcher, Request};
use crate::policy::{InterceptionPolicy, PolicyRules, Served, Source};
use crate::relay::{
  ClientRegistry, Cooldown, GeofencePlatform, InMemoryGeofencing, InboundMessage, Notification,
  Relay, RelayContext, Unsupported,
};

const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// External collaborators the worker is assembled from.
pub struct Parts<S: CacheStorage> {
  pub fetcher: Arc<dyn Fetcher>,
  pub storage: Arc<S>,
  pub staging: Result<Arc<StagingStore>, DbError>,
  pub platform: Arc<dyn GeofencePlatform>,
}

/// The background worker: owns the asset cache and the staging store and
/// dispatches every event to its handler.
pub struct Worker<S: CacheStorage> {
  config: Config,
  fetcher: Arc<dyn Fetcher>,
  cache: VersionedCache<S>,
  policy: InterceptionPolicy<S>,
  relay: Relay,
  staging: Option<Arc<StagingStore>>,
  outbox: Outbox,
}

impl Worker<SqliteStorage> {
  /// Build a worker over the real network, SQLite files under the data
  /// directory, and the configured geofencing capability. The data
  /// directory must already exist.
  pub fn open(config: Config, outbox: Outbox) -> Result<Self> {
    let data_dir = config.data_dir()?;

    let origin = config.origin()?;
    let fetcher = HttpFetcher::new(&origin, config.fetch_timeout())?;
    let storage = SqliteStorage::open(&data_dir.join("cache.db"))
      .map_err(|e| eyre!("Failed to open cache database: {}", e))?;
    let staging =
      StagingStore::open(&data_dir, &config.staging.database, config.staging.version).map(Arc::new);

    let platform: Arc<dyn GeofencePlatform> = if config.relay.geofencing {
      Arc::new(InMemoryGeofencing::new())
    } else {
      Arc::new(Unsupported)
    };

    let parts = Parts {
      fetcher: Arc::new(fetcher),
      storage: Arc::new(storage),
      staging,
      platform,
    };
    Self::assemble(config, parts, outbox)
  }
}

impl<S: CacheStorage + 'static> Worker<S> {
  pub fn assemble(config: Config, parts: Parts<S>, outbox: Outbox) -> Result<Self> {
    let origin = config.origin()?;
    let cache = VersionedCache::new(parts.storage, config.cache.version.clone(), origin);

    let policy = InterceptionPolicy::new(
      cache.clone(),
      Arc::clone(&parts.fetcher),
      PolicyRules {
        api_hosts: config.network.api_hosts.clone(),
        cache_non_get_requests: config.cache.cache_non_get_requests,
        shell: config.shell_url()?,
      },
    );

    // Staging failures must not stop the worker from serving.
    let (staging, sink): (Option<Arc<StagingStore>>, Arc<dyn RecordSink>) = match parts.staging {
      Ok(store) => (Some(Arc::clone(&store)), store as Arc<dyn RecordSink>),
      Err(e) => {
        error!(error = %e, "staging database unavailable, background ritase will not be recorded");
        (None, Arc::new(Unavailable::new(&e)))
      }
    };

    let notification = &config.notification;
    let relay = Relay::new(RelayContext {
      clients: ClientRegistry::new(),
      platform: parts.platform,
      staging: sink,
      notifier: Arc::new(OutboxNotifier::new(outbox.clone())),
      cooldown: Cooldown::new(config.cooldown()),
      region_name: config.relay.geofence_name.clone(),
      notification: Notification {
        title: notification.title.clone(),
        body: notification.body.clone(),
        icon: notification.icon.clone(),
        tag: notification.tag.clone(),
        require_interaction: true,
      },
    });

    Ok(Self {
      config,
      fetcher: parts.fetcher,
      cache,
      policy,
      relay,
      staging,
      outbox,
    })
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.cache.lifecycle()
  }

  /// Install, then activate straight away if install succeeded.
  pub async fn boot(&self) -> Result<(), InstallError> {
    self.install().await?;
    self.activate();
    Ok(())
  }

  pub async fn install(&self) -> Result<(), InstallError> {
    let result = self
      .cache
      .install(self.fetcher.as_ref(), &self.config.cache.manifest)
      .await;

    if let Err(e) = &result {
      error!(cache = %self.cache.version(), error = %e, "cache install failed");
    }
    self.outbox.send(HostOutput::Lifecycle {
      phase: "install".into(),
      ok: result.is_ok(),
      error: result.as_ref().err().map(|e| e.to_string()),
    });
    result
  }

  /// Activate and claim clients. Refused until an install has succeeded.
  pub fn activate(&self) -> bool {
    if self.lifecycle() == Lifecycle::Uninstalled {
      warn!(cache = %self.cache.version(), "activate before a successful install, ignoring");
      self.outbox.send(HostOutput::Lifecycle {
        phase: "activate".into(),
        ok: false,
        error: Some("cache not installed".into()),
      });
      return false;
    }

    let activation = self.cache.activate();
    let claimed = self.relay.clients().claim();
    info!(claimed, "worker activated");

    self.outbox.send(HostOutput::Lifecycle {
      phase: "activate".into(),
      ok: true,
      error: (!activation.failed.is_empty())
        .then(|| format!("could not delete: {}", activation.failed.join(", "))),
    });
    true
  }

  /// Answer a request. Until activation the worker does not control pages,
  /// so requests go straight to the network.
  pub async fn fetch(&self, request: &Request) -> Result<Served, NetworkError> {
    if self.lifecycle() != Lifecycle::Active {
      let response = self.fetcher.fetch(request).await?;
      return Ok(Served {
        response,
        source: Source::Bypass,
      });
    }
    self.policy.handle(request).await
  }

  /// Run the handler for one event to completion.
  pub async fn dispatch(&self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install => {
        let _ = self.install().await;
      }
      WorkerEvent::Activate => {
        self.activate();
      }
      WorkerEvent::Fetch { id, request } => self.on_fetch(id, request).await,
      WorkerEvent::Connect { client } => {
        let rx = self.relay.clients().connect(&client);
        let _ = self.outbox.forward_client(client, rx);
      }
      WorkerEvent::Disconnect { client } => {
        self.relay.clients().disconnect(&client);
      }
      WorkerEvent::Message {
        client,
        data,
        reply,
      } => self.on_message(client, data, reply).await,
      WorkerEvent::GeofenceEnter(event) => {
        self.relay.on_enter(&event);
      }
      WorkerEvent::GeofenceLeave(event) => {
        self.relay.on_leave(&event).await;
      }
      WorkerEvent::Sync { tag } => self.on_sync(&tag),
    }
  }

  async fn on_fetch(&self, id: String, request: Request) {
    match self.fetch(&request).await {
      Ok(served) => {
        let content_type = served.response.header("content-type").map(String::from);
        let status = served.response.status;
        let body = served.response.into_body();
        self.outbox.send(HostOutput::Response {
          id,
          status,
          source: served.source.as_str().into(),
          content_type,
          body: String::from_utf8_lossy(&body).into_owned(),
        });
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "fetch failed");
        self.outbox.send(HostOutput::FetchError {
          id,
          error: e.to_string(),
        });
      }
    }
  }

  async fn on_message(&self, client: String, data: serde_json::Value, reply: Option<String>) {
    let message = match InboundMessage::decode(data) {
      Ok(message) => message,
      Err(e) => {
        warn!(client = %client, error = %e, "ignoring message");
        return;
      }
    };

    let Some(answer) = self.relay.handle_message(message).await else {
      return;
    };

    match (reply, serde_json::to_value(answer)) {
      (Some(port), Ok(data)) => self.outbox.send(HostOutput::Reply { port, data }),
      (None, _) => debug!(client = %client, "reply dropped, no port given"),
      (_, Err(e)) => error!(error = %e, "failed to encode reply"),
    }
  }

  /// Background sync hook. Upload is the foreground's job; the worker only
  /// reports how much is waiting.
  fn on_sync(&self, tag: &str) {
    if tag != BACKGROUND_SYNC_TAG {
      debug!(tag, "ignoring sync tag");
      return;
    }

    match self.staging.as_ref().map(|store| store.count()) {
      Some(Ok(pending)) => info!(pending, "background sync triggered"),
      Some(Err(e)) => warn!(error = %e, "background sync could not read staging"),
      None => warn!("background sync triggered without a staging database"),
    }
  }

  /// Boot, then serve host events until input closes.
  ///
  /// Lifecycle events are handled inline so install always finishes before
  /// activate is considered. Everything else gets its own task.
  pub async fn run(self: Arc<Self>, mut events: EventHandler) {
    if let Err(e) = self.boot().await {
      warn!(error = %e, "worker not activated, waiting for a retried install");
    }

    while let Some(event) = events.next().await {
      match event {
        WorkerEvent::Install | WorkerEvent::Activate => self.dispatch(event).await,
        event => {
          let worker = Arc::clone(&self);
          tokio::spawn(async move { worker.dispatch(event).await });
        }
      }
    }

    info!("host input closed, shutting down");
  }
}
