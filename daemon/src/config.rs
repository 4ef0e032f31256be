use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::event::TrackerEvent;
use crate::game_state::{DisplaySettings, LineSource};
use crate::log_scanner::LogSettings;

pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

pub const MIN_LOG_SIZE_LIMIT_KB: u64 = 100;
pub const MAX_LOG_SIZE_LIMIT_KB: u64 = 50_000;
pub const DEFAULT_LOG_SIZE_LIMIT_KB: u64 = 2_000;

pub const MIN_CACHE_TTL_HOURS: u32 = 1;
pub const DEFAULT_CACHE_TTL_HOURS: u32 = 168;

pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Takes precedence over `custom_maps.api_key`.
pub const API_KEY_ENV: &str = "TF2_PRESENCE_API_KEY";

/// Root configuration structure. Deserialized from <config dir>/tf2-presence/config.toml.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub custom_maps: CustomMapsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between ticks. Clamped to [1, 60].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogConfig {
    /// How much of the console log tail is read per scan, in KB. Clamped to [100, 50000].
    #[serde(default = "default_size_limit")]
    pub size_limit_kb: u64,
    /// Whether an oversized console log may be trimmed on disk.
    #[serde(default = "default_true")]
    pub trim: bool,
    /// Extra in-game names, on top of the ones found in the Steam login file.
    #[serde(default)]
    pub usernames: Vec<String>,
    /// Explicit console.log path. Derived from the game's install directory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            size_limit_kb: DEFAULT_LOG_SIZE_LIMIT_KB,
            trim: true,
            usernames: Vec::new(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_top_line")]
    pub top_line: LineSource,
    #[serde(default = "default_bottom_line")]
    pub bottom_line: LineSource,
    /// Show "Queued" instead of "Queued for Casual".
    #[serde(default)]
    pub hide_queued_gamemode: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            top_line: default_top_line(),
            bottom_line: default_bottom_line(),
            hide_queued_gamemode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomMapsConfig {
    /// Ask teamwork.tf about maps the built-in tables cannot classify.
    #[serde(default = "default_true")]
    pub remote_lookup: bool,
    #[serde(default)]
    pub api_key: String,
    /// Age after which a cached classification is fetched again. At least 1.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_hours: u32,
    /// Clamped to [1, 30].
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CustomMapsConfig {
    fn default() -> Self {
        Self {
            remote_lookup: true,
            api_key: String::new(),
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn poll_interval_secs(&self) -> u64 {
        self.general
            .poll_interval_secs
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS)
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            size_limit_kb: self
                .log
                .size_limit_kb
                .clamp(MIN_LOG_SIZE_LIMIT_KB, MAX_LOG_SIZE_LIMIT_KB),
            trim: self.log.trim,
            hide_queued_gamemode: self.display.hide_queued_gamemode,
        }
    }

    pub fn display_settings(&self) -> DisplaySettings {
        DisplaySettings {
            top_line: self.display.top_line,
            bottom_line: self.display.bottom_line,
        }
    }

    pub fn cache_ttl_hours(&self) -> u32 {
        self.custom_maps.cache_ttl_hours.max(MIN_CACHE_TTL_HOURS)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.custom_maps
                .request_timeout_secs
                .clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS),
        )
    }

    /// The API key for remote classification: the environment wins over the file.
    /// `None` if remote lookup is disabled or no key is available.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with(&self, env_key: Option<String>) -> Option<String> {
        if !self.custom_maps.remote_lookup {
            return None;
        }
        env_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| Some(self.custom_maps.api_key.clone()))
            .filter(|k| !k.trim().is_empty())
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches the directory containing `path` and sends `ConfigReloaded` every
/// time the config file is created or modified and still parses.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<TrackerEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(target: "config", "Config hot reload disabled, watcher failed: {e}");
            return;
        }
    };

    // Editors save by writing a new file and renaming it, so watch the directory.
    let Some(watch_dir) = path.parent().map(Path::to_path_buf) else {
        tracing::warn!(target: "config", "Config path {} has no parent directory", path.display());
        return;
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::warn!(target: "config", "Failed to watch {}: {e}", watch_dir.display());
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let touches_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !(touches_config && is_write) {
            continue;
        }

        match load_or_default(&path) {
            Ok(config) => {
                if tx.send(TrackerEvent::ConfigReloaded(config)).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(target: "config", "Keeping previous config: {e:#}"),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_size_limit() -> u64 {
    DEFAULT_LOG_SIZE_LIMIT_KB
}

fn default_true() -> bool {
    true
}

fn default_top_line() -> LineSource {
    LineSource::Map
}

fn default_bottom_line() -> LineSource {
    LineSource::Class
}

fn default_cache_ttl() -> u32 {
    DEFAULT_CACHE_TTL_HOURS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_values() {
        let c = Config::default();
        assert_eq!(c.poll_interval_secs(), DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(c.log.size_limit_kb, DEFAULT_LOG_SIZE_LIMIT_KB);
        assert!(c.log.trim);
        assert!(c.log.usernames.is_empty());
        assert!(c.log.path.is_none());
        assert_eq!(c.display_settings(), DisplaySettings::default());
        assert!(!c.display.hide_queued_gamemode);
        assert!(c.custom_maps.remote_lookup);
        assert_eq!(c.cache_ttl_hours(), DEFAULT_CACHE_TTL_HOURS);
    }

    // ── clamping ──────────────────────────────────────────────────────────────

    #[test]
    fn log_size_limit_is_clamped() {
        let mut c = Config::default();
        c.log.size_limit_kb = 1;
        assert_eq!(c.log_settings().size_limit_kb, MIN_LOG_SIZE_LIMIT_KB);
        c.log.size_limit_kb = 10_000_000;
        assert_eq!(c.log_settings().size_limit_kb, MAX_LOG_SIZE_LIMIT_KB);
    }

    #[test]
    fn poll_interval_and_timeout_are_clamped() {
        let mut c = Config::default();
        c.general.poll_interval_secs = 0;
        c.custom_maps.request_timeout_secs = 600;
        assert_eq!(c.poll_interval_secs(), MIN_POLL_INTERVAL_SECS);
        assert_eq!(c.request_timeout().as_secs(), MAX_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn zero_ttl_is_raised_to_minimum() {
        let mut c = Config::default();
        c.custom_maps.cache_ttl_hours = 0;
        assert_eq!(c.cache_ttl_hours(), MIN_CACHE_TTL_HOURS);
    }

    #[test]
    fn log_settings_carry_display_flag() {
        let mut c = Config::default();
        c.display.hide_queued_gamemode = true;
        assert!(c.log_settings().hide_queued_gamemode);
    }

    // ── api key ───────────────────────────────────────────────────────────────

    #[test]
    fn environment_key_wins() {
        let mut c = Config::default();
        c.custom_maps.api_key = "from-file".to_string();
        assert_eq!(c.api_key_with(Some("from-env".into())).as_deref(), Some("from-env"));
        assert_eq!(c.api_key_with(Some("  ".into())).as_deref(), Some("from-file"));
        assert_eq!(c.api_key_with(None).as_deref(), Some("from-file"));
    }

    #[test]
    fn no_key_or_disabled_lookup_means_no_remote() {
        let mut c = Config::default();
        assert!(c.api_key_with(None).is_none());
        c.custom_maps.api_key = "k".to_string();
        c.custom_maps.remote_lookup = false;
        assert!(c.api_key_with(Some("env".into())).is_none());
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[general]
poll_interval_secs = 5

[log]
size_limit_kb = 500
trim = false
usernames = ["Alice", "Bob"]
path = "/games/tf2/tf/console.log"

[display]
top_line = "server_name"
bottom_line = "time_on_map"
hide_queued_gamemode = true

[custom_maps]
remote_lookup = false
api_key = "abc"
cache_ttl_hours = 24
request_timeout_secs = 3
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.poll_interval_secs(), 5);
        assert_eq!(config.log.size_limit_kb, 500);
        assert!(!config.log.trim);
        assert_eq!(config.log.usernames, vec!["Alice", "Bob"]);
        assert_eq!(config.log.path, Some(PathBuf::from("/games/tf2/tf/console.log")));
        assert_eq!(config.display.top_line, LineSource::ServerName);
        assert_eq!(config.display.bottom_line, LineSource::TimeOnMap);
        assert!(config.display.hide_queued_gamemode);
        assert!(!config.custom_maps.remote_lookup);
        assert_eq!(config.custom_maps.api_key, "abc");
        assert_eq!(config.cache_ttl_hours(), 24);
        assert_eq!(config.request_timeout().as_secs(), 3);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\nbottom_line = \"player_count\"\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.display.top_line, LineSource::Map);
        assert_eq!(config.display.bottom_line, LineSource::PlayerCount);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn unknown_line_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\ntop_line = \"weather\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
