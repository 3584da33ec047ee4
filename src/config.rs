use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the gateway forwards to, e.g. "http://127.0.0.1:5000"
  pub upstream: String,
  /// Address the gateway listens on
  #[serde(default = "default_listen")]
  pub listen: String,
  /// Paths fetched and stored into the shell cache during install
  #[serde(default)]
  pub precache: Vec<String>,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path fragment identifying API calls
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Path fragments identifying static resources
  #[serde(default = "default_static_prefixes")]
  pub static_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
  /// Precached page served when a dynamic page is unreachable and uncached
  #[serde(default = "default_fallback_page")]
  pub fallback_page: Option<String>,
  /// Localized notice embedded in the offline API sentinel
  #[serde(default = "default_offline_message")]
  pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Upstream path the offline batch is POSTed to
  #[serde(default = "default_sync_path")]
  pub push_path: String,
  /// Background-sync tag this worker answers to
  #[serde(default = "default_sync_tag")]
  pub tag: String,
}

fn default_listen() -> String {
  "127.0.0.1:8787".to_string()
}

fn default_api_prefix() -> String {
  "/mobile/api/".to_string()
}

fn default_static_prefixes() -> Vec<String> {
  ["/static/", "/images/", "/css/", "/js/"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_fallback_page() -> Option<String> {
  Some("/mobile/offline".to_string())
}

fn default_offline_message() -> String {
  "No internet connection".to_string()
}

fn default_sync_path() -> String {
  "/mobile/api/sync/push".to_string()
}

fn default_sync_tag() -> String {
  "sync-scans".to_string()
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
      static_prefixes: default_static_prefixes(),
    }
  }
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      fallback_page: default_fallback_page(),
      message: default_offline_message(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      push_path: default_sync_path(),
      tag: default_sync_tag(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./scangate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/scangate/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/scangate/config.yaml\n\
                 with at least an `upstream` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("scangate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("scangate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The upstream origin as a parsed URL.
  pub fn upstream_url(&self) -> Result<Url> {
    Url::parse(&self.upstream).map_err(|e| eyre!("Invalid upstream URL {}: {}", self.upstream, e))
  }

  /// Default data directory for the cache and queue databases.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("scangate"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str("upstream: http://127.0.0.1:5000\n").unwrap();

    assert_eq!(config.listen, "127.0.0.1:8787");
    assert_eq!(config.routes.api_prefix, "/mobile/api/");
    assert!(config
      .routes
      .static_prefixes
      .contains(&"/static/".to_string()));
    assert_eq!(
      config.offline.fallback_page.as_deref(),
      Some("/mobile/offline")
    );
    assert_eq!(config.sync.push_path, "/mobile/api/sync/push");
    assert_eq!(config.sync.tag, "sync-scans");
    assert!(config.precache.is_empty());
  }

  #[test]
  fn test_full_config_overrides() {
    let yaml = r#"
upstream: http://app.internal
listen: 0.0.0.0:9000
precache:
  - /
  - /mobile/app
routes:
  api_prefix: /api/v2/
  static_prefixes: ["/assets/"]
offline:
  fallback_page: /offline.html
  message: "بدون اتصال إنترنت"
sync:
  push_path: /api/v2/sync
  tag: sync-uploads
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.precache.len(), 2);
    assert_eq!(config.routes.api_prefix, "/api/v2/");
    assert_eq!(config.offline.message, "بدون اتصال إنترنت");
    assert_eq!(config.sync.tag, "sync-uploads");
  }

  #[test]
  fn test_upstream_url_must_parse() {
    let config: Config = serde_yaml::from_str("upstream: 'not a url'\n").unwrap();
    assert!(config.upstream_url().is_err());
  }
}
