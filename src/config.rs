use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub storage: StorageConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub worker: WorkerConfig,
  pub network: NetworkConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the document API (e.g., "https://api.example.com/v1")
  pub base_url: String,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database for the local mirror (defaults to the user data dir)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub capacity: usize,
  pub default_ttl_secs: u64,
  /// Serialized size in bytes above which values are stored compressed
  pub compression_threshold: usize,
  pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      capacity: 100,
      default_ttl_secs: 5 * 60,
      compression_threshold: 1000,
      cleanup_interval_secs: 10 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// How often queued remote writes are retried
  pub retry_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retry_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub cache_capacity: usize,
  /// Items per progress report in batch operations
  pub chunk_size: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_capacity: crate::worker::DEFAULT_RESULT_CAPACITY,
      chunk_size: crate::worker::DEFAULT_CHUNK_SIZE,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Cache version; partitions of any other version are purged on activation
  pub version: String,
  /// Origin relative URLs are resolved against
  pub origin: String,
  /// App shell precached on install
  pub static_assets: Vec<String>,
  pub static_prefixes: Vec<String>,
  /// Path prefixes of volatile data endpoints
  pub dynamic_paths: Vec<String>,
  /// Data URLs refreshed on background sync
  pub critical_urls: Vec<String>,
  /// Pages preloaded on a general background sync
  pub navigation_urls: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      origin: "http://localhost:3000".to_string(),
      static_assets: strings(&[
        "/",
        "/index.html",
        "/manifest.json",
        "/favicon.ico",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]),
      static_prefixes: strings(&["/static/"]),
      dynamic_paths: strings(&["/api/"]),
      critical_urls: strings(&[
        "/api/rooms",
        "/api/clients",
        "/api/reservations",
        "/api/bills",
      ]),
      navigation_urls: strings(&[
        "/",
        "/dashboard",
        "/rooms",
        "/clients",
        "/reservations",
        "/billing",
      ]),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// When set, logs are also written to a daily rolling file here
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./frontdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/frontdesk/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("frontdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("frontdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("{} ({})", e, path.display()))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  /// Get the remote API token from the environment, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FRONTDESK_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
