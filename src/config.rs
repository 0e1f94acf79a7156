//! Configuration loading for the service binaries.
//!
//! Configuration is loaded from TOML files with the following resolution
//! order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.gjallarhorn/config.toml` (user)
//! 3. `/etc/gjallarhorn/config.toml` (system)
//!
//! With no file found, built-in defaults apply — both binaries run
//! against localhost out of the box.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::fetcher::{DEFAULT_ORIGIN_TEMPLATE, KEY_PLACEHOLDER};
use crate::{GjallarhornError, Result};

#[cfg(feature = "client")]
use crate::mirror::supervisor::BackoffConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// Datafile manager (gjalld) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Address to bind to (default: 127.0.0.1:2222).
    #[serde(default = "default_manager_address")]
    pub address: String,
    /// Origin URL template; `{KEY}` expands to the SDK key.
    #[serde(default = "default_origin_template")]
    pub origin_template: String,
    /// Bound on a single origin fetch, in seconds (default: 30).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Interval between subscriber liveness probes, in seconds
    /// (default: 30).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Optional interval for periodic active-set refresh, in seconds.
    /// Absent means push-only operation.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    /// Keys registered and fetched at startup.
    #[serde(default)]
    pub sdk_keys: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            address: default_manager_address(),
            origin_template: default_origin_template(),
            fetch_timeout_secs: default_fetch_timeout(),
            probe_interval_secs: default_probe_interval(),
            refresh_interval_secs: None,
            sdk_keys: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }
}

/// Subscriber-side (gjall / embedded mirror) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Manager fan-out endpoint (default: ws://127.0.0.1:2222/ws).
    #[serde(default = "default_manager_ws_url")]
    pub manager_ws_url: String,
    /// Manager HTTP base URL (default: http://127.0.0.1:2222).
    #[serde(default = "default_manager_http_url")]
    pub manager_http_url: String,
    /// Default SDK key for RPC operations that don't name one.
    #[serde(default)]
    pub sdk_key: Option<String>,
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            manager_ws_url: default_manager_ws_url(),
            manager_http_url: default_manager_http_url(),
            sdk_key: None,
            backoff: BackoffSettings::default(),
        }
    }
}

impl SubscriberConfig {
    /// URL template for fetching documents from the manager.
    pub fn datafile_template(&self) -> String {
        format!(
            "{}/datafile/json/{KEY_PLACEHOLDER}",
            self.manager_http_url.trim_end_matches('/')
        )
    }

    #[cfg(feature = "client")]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::new()
            .initial(Duration::from_millis(self.backoff.initial_ms))
            .max(Duration::from_millis(self.backoff.max_ms))
            .multiplier(self.backoff.multiplier)
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffSettings {
    /// Delay before the first reconnect attempt, in milliseconds
    /// (default: 500).
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,
    /// Cap on the reconnect delay, in milliseconds (default: 30000).
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,
    /// Growth factor between attempts (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_manager_address() -> String {
    "127.0.0.1:2222".to_string()
}

fn default_origin_template() -> String {
    DEFAULT_ORIGIN_TEMPLATE.to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_probe_interval() -> u64 {
    30
}

fn default_manager_ws_url() -> String {
    "ws://127.0.0.1:2222/ws".to_string()
}

fn default_manager_http_url() -> String {
    "http://127.0.0.1:2222".to_string()
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist; otherwise the first file found wins
    /// and a missing file falls back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Config::default()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GjallarhornError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            GjallarhornError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(GjallarhornError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gjallarhorn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/gjallarhorn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.manager.address, "127.0.0.1:2222");
        assert_eq!(config.manager.origin_template, DEFAULT_ORIGIN_TEMPLATE);
        assert_eq!(config.manager.fetch_timeout_secs, 30);
        assert_eq!(config.manager.probe_interval_secs, 30);
        assert!(config.manager.refresh_interval_secs.is_none());
        assert!(config.manager.sdk_keys.is_empty());
        assert_eq!(config.subscriber.manager_ws_url, "ws://127.0.0.1:2222/ws");
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [manager]
            address = "0.0.0.0:2222"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.manager.address, "0.0.0.0:2222");
        // Defaults preserved
        assert_eq!(config.manager.fetch_timeout_secs, 30);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [manager]
            address = "127.0.0.1:2222"
            origin_template = "https://origin.example.com/files/{KEY}.json"
            fetch_timeout_secs = 10
            probe_interval_secs = 15
            refresh_interval_secs = 900
            sdk_keys = ["alpha", "beta"]

            [subscriber]
            manager_ws_url = "ws://manager:2222/ws"
            manager_http_url = "http://manager:2222"
            sdk_key = "alpha"

            [subscriber.backoff]
            initial_ms = 250
            max_ms = 10000
            multiplier = 1.5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.manager.origin_template,
            "https://origin.example.com/files/{KEY}.json"
        );
        assert_eq!(config.manager.refresh_interval_secs, Some(900));
        assert_eq!(config.manager.sdk_keys, vec!["alpha", "beta"]);
        assert_eq!(config.subscriber.sdk_key.as_deref(), Some("alpha"));
        assert_eq!(config.subscriber.backoff.initial_ms, 250);
        assert_eq!(config.subscriber.backoff.multiplier, 1.5);
    }

    #[test]
    fn datafile_template_strips_trailing_slash() {
        let subscriber = SubscriberConfig {
            manager_http_url: "http://manager:2222/".to_string(),
            ..SubscriberConfig::default()
        };
        assert_eq!(
            subscriber.datafile_template(),
            "http://manager:2222/datafile/json/{KEY}"
        );
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[manager]\naddress = \"127.0.0.1:9000\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.manager.address, "127.0.0.1:9000");
    }
}
