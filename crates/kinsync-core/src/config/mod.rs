//! Client configuration.
//!
//! Stored as JSON (normally in the platform config directory, chosen by the
//! binary) and overridable per process through `KINSYNC_*` environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outbox::OfflineQueuePolicy;
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3001";
pub const SERVER_URL_ENV: &str = "KINSYNC_SERVER_URL";
pub const DB_PATH_ENV: &str = "KINSYNC_DB_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of one client installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the merge server
    pub server_url: String,
    /// Local replica database; the binary picks a default when unset
    pub db_path: Option<PathBuf>,
    pub sync_interval_secs: u64,
    /// Presence heartbeat period while a user is signed in
    pub heartbeat_interval_secs: u64,
    /// Pause after connectivity returns before draining the outbox
    pub reconnect_settle_ms: u64,
    pub request_timeout_secs: u64,
    pub presence_ttl_secs: u64,
    pub offline_queue: OfflineQueuePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            db_path: None,
            sync_interval_secs: 5,
            heartbeat_interval_secs: 10,
            reconnect_settle_ms: 1_000,
            request_timeout_secs: 10,
            presence_ttl_secs: 30,
            offline_queue: OfflineQueuePolicy::Legacy,
        }
    }
}

impl ClientConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&raw)?;
        config.validated()
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{payload}\n"))?;
        Ok(())
    }

    /// Apply `KINSYNC_SERVER_URL` / `KINSYNC_DB_PATH` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production,
    /// a map in tests).
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = normalize_text_option(lookup(SERVER_URL_ENV)) {
            self.server_url = url;
        }
        if let Some(path) = normalize_text_option(lookup(DB_PATH_ENV)) {
            self.db_path = Some(PathBuf::from(path));
        }
        self.validated()
    }

    /// Normalize and check ranges.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let url = normalize_text_option(Some(self.server_url.clone()))
            .ok_or_else(|| ConfigError::Invalid("server_url must not be empty".to_string()))?;
        if !is_http_url(&url) {
            return Err(ConfigError::Invalid(
                "server_url must include http:// or https://".to_string(),
            ));
        }
        self.server_url = url.trim_end_matches('/').to_string();

        for (name, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("presence_ttl_secs", self.presence_ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        Ok(self)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub const fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = ClientConfig::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.presence_ttl(), Duration::from_secs(30));
        assert_eq!(config.offline_queue, OfflineQueuePolicy::Legacy);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from_path(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let config = ClientConfig {
            server_url: "https://family.example.com".to_string(),
            offline_queue: OfflineQueuePolicy::AllMutations,
            ..ClientConfig::default()
        };
        config.save_to_path(&path).unwrap();
        assert_eq!(ClientConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"sync_interval_secs": 30}"#).unwrap();

        let config = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"sync_every": 30}"#).unwrap();
        assert!(matches!(
            ClientConfig::load_from_path(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let env = HashMap::from([
            (SERVER_URL_ENV, "http://10.0.0.2:3001/".to_string()),
            (DB_PATH_ENV, "/tmp/kin.db".to_string()),
        ]);
        let config = ClientConfig::default()
            .with_overrides_from(|key| env.get(key).cloned())
            .unwrap();
        assert_eq!(config.server_url, "http://10.0.0.2:3001");
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/kin.db")));

        let bad = HashMap::from([(SERVER_URL_ENV, "ftp://nope".to_string())]);
        assert!(ClientConfig::default()
            .with_overrides_from(|key| bad.get(key).cloned())
            .is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = ClientConfig {
            sync_interval_secs: 0,
            ..ClientConfig::default()
        };
        assert!(config.validated().is_err());
    }
}
