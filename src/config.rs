use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the cache and staging databases live (default: $XDG_DATA_HOME/ritase)
  pub data_dir: Option<PathBuf>,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub staging: StagingConfig,
  pub relay: RelayConfig,
  pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation name; bump on every deploy that changes the manifest or policy
  pub version: String,
  /// Base URL the manifest entries resolve against
  pub origin: String,
  pub manifest: Vec<String>,
  /// Document served for navigations while offline
  pub shell: String,
  /// Cache-first for every method instead of GET only
  pub cache_non_get_requests: bool,
  pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "timesheet-cache-v4.1".to_string(),
      origin: "http://localhost:8080/".to_string(),
      manifest: [
        "./",
        "./index.html",
        "./js/tailwindcss.js",
        "./css/inter-font.css",
        "./css/fontawesome.min.css",
        "./js/supabase.min.js",
        "./js/jspdf.umd.min.js",
        "./js/jspdf.plugin.autotable.min.js",
        "./icon.png",
        "./manifest.json",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      shell: "./index.html".to_string(),
      cache_non_get_requests: false,
      fetch_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Hostname substrings of the remote API; never cached
  pub api_hosts: Vec<String>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      api_hosts: vec!["supabase.co".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
  pub database: String,
  pub version: u32,
}

impl Default for StagingConfig {
  fn default() -> Self {
    Self {
      database: "LaporanKerjaDB_v10_Offline".to_string(),
      version: 1,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
  pub cooldown_secs: u64,
  /// Name given to the registered region
  pub geofence_name: String,
  /// Whether this platform offers geofencing at all
  pub geofencing: bool,
}

impl Default for RelayConfig {
  fn default() -> Self {
    Self {
      cooldown_secs: 30,
      geofence_name: "muatan-area".to_string(),
      geofencing: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub tag: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Auto-Ritase".to_string(),
      body: "Ritase tercatat otomatis saat meninggalkan area muatan.".to_string(),
      icon: "./icon.png".to_string(),
      tag: "ritase-notification".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./ritase.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ritase/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. `RITASE_ORIGIN`
  /// overrides `cache.origin`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("RITASE_ORIGIN") {
      config.cache.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ritase.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ritase").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  fn validate(&self) -> Result<()> {
    let origin = self.origin()?;
    origin
      .join(&self.cache.shell)
      .map_err(|e| eyre!("Invalid shell document {}: {}", self.cache.shell, e))?;
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.cache.origin)
      .map_err(|e| eyre!("Invalid cache origin {}: {}", self.cache.origin, e))
  }

  pub fn shell_url(&self) -> Result<Url> {
    self
      .origin()?
      .join(&self.cache.shell)
      .map_err(|e| eyre!("Invalid shell document {}: {}", self.cache.shell, e))
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.fetch_timeout_secs)
  }

  pub fn cooldown(&self) -> Duration {
    Duration::from_secs(self.relay.cooldown_secs)
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ritase"))
  }
}
