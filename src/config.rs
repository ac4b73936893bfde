//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$TEMPBOX_CONFIG` (environment variable)
//! 2. `~/.config/tempbox/config.toml` (Linux/macOS)
//!    `%APPDATA%\tempbox\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Directory name used under the platform config, data, and cache dirs.
const APP_DIR: &str = "tempbox";
const CONFIG_ENV: &str = "TEMPBOX_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Remote mailbox provider.
    pub provider: ProviderConfig,
    /// Cross-tab sync timers.
    pub refresh: RefreshConfig,
    /// Message list presentation.
    pub view: ViewConfig,
    /// Storage limits.
    pub storage: StorageConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override the data directory holding the local store.
    pub data_dir: Option<PathBuf>,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Remote mailbox provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL; requests go to `{base_url}/api?action=...`.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

/// Timers for cross-tab convergence. The inbox poll period is a user
/// setting (`refreshInterval`) persisted with the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Milliseconds between cross-tab broadcasts.
    pub sync_interval_ms: u64,
    /// Milliseconds between checks of the shared trigger value.
    pub trigger_poll_ms: u64,
}

/// Message list presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Messages per page in each of the read and unread lists.
    pub page_size: usize,
}

/// Storage limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Soft limit on the serialized size of one account's messages.
    pub max_storage_bytes: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            trigger_poll_ms: 1_000,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: 50 * 1024 * 1024, // 50 MB
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RefreshConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn trigger_poll(&self) -> Duration {
        Duration::from_millis(self.trigger_poll_ms.max(1))
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Read the config file, or fall back to the defaults.
///
/// A missing file is normal. An unreadable or malformed one is logged and
/// then ignored.
pub fn load_config() -> Config {
    let Some(path) = config_file_path() else {
        return Config::default();
    };
    match read_config(&path) {
        Ok(Some(cfg)) => {
            tracing::info!(path = %path.display(), "Config loaded");
            cfg
        }
        Ok(None) => Config::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring config file");
            Config::default()
        }
    }
}

/// Parse the TOML file at `path`. `None` when there is no such file.
fn read_config(path: &Path) -> anyhow::Result<Option<Config>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let cfg = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(cfg))
}

/// Write `config` where `load_config` will find it. Returns the path.
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let path = config_file_path().context("no config directory on this platform")?;
    write_config(config, &path)?;
    tracing::info!(path = %path.display(), "Config written");
    Ok(path)
}

fn write_config(config: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// `$TEMPBOX_CONFIG` if set, else `<config dir>/tempbox/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Some(PathBuf::from(path)),
        None => dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml")),
    }
}

/// Where the local store lives.
pub fn data_dir(config: &Config) -> PathBuf {
    app_dir(config.general.data_dir.as_deref(), dirs::data_dir())
}

/// Where log files go.
pub fn cache_dir(config: &Config) -> PathBuf {
    app_dir(config.general.cache_dir.as_deref(), dirs::cache_dir())
}

/// An explicit override wins; otherwise `<platform dir>/tempbox`, or
/// `./tempbox` when the platform has none.
fn app_dir(configured: Option<&Path>, platform: Option<PathBuf>) -> PathBuf {
    match configured {
        Some(dir) => dir.to_path_buf(),
        None => platform.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.provider.request_timeout_ms, 10_000);
        assert_eq!(cfg.refresh.sync_interval_ms, 30_000);
        assert_eq!(cfg.view.page_size, 20);
        assert_eq!(cfg.storage.max_storage_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.provider.base_url, cfg.provider.base_url);
        assert_eq!(parsed.view.page_size, cfg.view.page_size);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[provider]
base_url = "https://mail.example.net"

[view]
page_size = 5
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.provider.base_url, "https://mail.example.net");
        assert_eq!(cfg.view.page_size, 5);
        // Other fields use defaults
        assert_eq!(cfg.provider.request_timeout_ms, 10_000);
        assert_eq!(cfg.refresh.trigger_poll_ms, 1_000);
    }

    #[test]
    fn test_zero_intervals_are_floored() {
        let mut cfg = Config::default();
        cfg.refresh.sync_interval_ms = 0;
        assert_eq!(cfg.refresh.sync_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_read_config_missing_file_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(read_config(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn test_read_config_rejects_malformed_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[view\npage_size = ").unwrap();
        let err = read_config(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn test_write_then_read_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.view.page_size = 7;
        write_config(&cfg, &path).unwrap();
        let loaded = read_config(&path).unwrap().unwrap();
        assert_eq!(loaded.view.page_size, 7);
    }

    #[test]
    fn test_app_dir_prefers_override() {
        let custom = PathBuf::from("/srv/mail");
        assert_eq!(app_dir(Some(custom.as_path()), Some(PathBuf::from("/home/u/.local/share"))), custom);
        assert_eq!(
            app_dir(None, Some(PathBuf::from("/home/u/.cache"))),
            PathBuf::from("/home/u/.cache/tempbox")
        );
        assert_eq!(app_dir(None, None), PathBuf::from("./tempbox"));
    }
}
