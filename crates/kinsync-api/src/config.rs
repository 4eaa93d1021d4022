use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use kinsync_core::util::is_http_url;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3001";
const DEFAULT_DATA_FILE: &str = "db.json";
const DEFAULT_BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;
const MIN_BODY_LIMIT_BYTES: usize = 1024;
const MAX_BODY_LIMIT_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_PRESENCE_TTL_SECS: u64 = 30;
const DEFAULT_WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";
const DEFAULT_DUCKDUCKGO_API_URL: &str = "https://api.duckduckgo.com/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Canonical snapshot document
    pub data_file: PathBuf,
    pub body_limit_bytes: usize,
    pub search_timeout: Duration,
    /// Heartbeat age after which `/healthz` stops counting a user as online
    pub presence_ttl: Duration,
    pub wikipedia_api_url: String,
    pub duckduckgo_api_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = match optional_trimmed(&lookup, "KINSYNC_API_BIND_ADDR") {
            Some(addr) => addr,
            None => match optional_trimmed(&lookup, "PORT") {
                Some(port) => {
                    let port = port.parse::<u16>().map_err(|_| {
                        ConfigError::Invalid("PORT must be an integer in [0, 65535]".to_string())
                    })?;
                    format!("0.0.0.0:{port}")
                }
                None => DEFAULT_BIND_ADDR.to_string(),
            },
        };

        let data_file = PathBuf::from(value_or_default(
            &lookup,
            "KINSYNC_DATA_FILE",
            DEFAULT_DATA_FILE,
        ));

        let body_limit_bytes = match optional_trimmed(&lookup, "KINSYNC_BODY_LIMIT_BYTES") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                ConfigError::Invalid(
                    "KINSYNC_BODY_LIMIT_BYTES must be an integer in [1024, 268435456]".to_string(),
                )
            })?,
            None => DEFAULT_BODY_LIMIT_BYTES,
        };
        if !(MIN_BODY_LIMIT_BYTES..=MAX_BODY_LIMIT_BYTES).contains(&body_limit_bytes) {
            return Err(ConfigError::Invalid(
                "KINSYNC_BODY_LIMIT_BYTES must be in [1024, 268435456]".to_string(),
            ));
        }

        let search_timeout_secs = bounded_secs(&lookup, "KINSYNC_SEARCH_TIMEOUT_SECS", 8, 1..=60)?;
        let presence_ttl_secs =
            bounded_secs(&lookup, "KINSYNC_PRESENCE_TTL_SECS", DEFAULT_PRESENCE_TTL_SECS, 1..=3600)?;

        let wikipedia_api_url =
            http_url_or_default(&lookup, "KINSYNC_WIKIPEDIA_API_URL", DEFAULT_WIKIPEDIA_API_URL)?;
        let duckduckgo_api_url = http_url_or_default(
            &lookup,
            "KINSYNC_DUCKDUCKGO_API_URL",
            DEFAULT_DUCKDUCKGO_API_URL,
        )?;

        Ok(Self {
            bind_addr,
            data_file,
            body_limit_bytes,
            search_timeout: Duration::from_secs(search_timeout_secs),
            presence_ttl: Duration::from_secs(presence_ttl_secs),
            wikipedia_api_url,
            duckduckgo_api_url,
        })
    }
}

fn bounded_secs(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let secs = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<u64>().map_err(|_| invalid())?,
        None => default,
    };
    if range.contains(&secs) {
        Ok(secs)
    } else {
        Err(invalid())
    }
}

fn http_url_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let url = value_or_default(lookup, name, default);
    if !is_http_url(&url) {
        return Err(ConfigError::Invalid(format!(
            "{name} must start with http:// or https://"
        )));
    }
    Ok(url)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_need_no_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3001");
        assert_eq!(config.data_file, PathBuf::from("db.json"));
        assert_eq!(config.body_limit_bytes, 50 * 1024 * 1024);
        assert_eq!(config.search_timeout, Duration::from_secs(8));
        assert_eq!(config.presence_ttl, Duration::from_secs(30));
    }

    #[test]
    fn presence_ttl_is_configurable_and_bounded() {
        let config = config_from(&[("KINSYNC_PRESENCE_TTL_SECS", "90")]).unwrap();
        assert_eq!(config.presence_ttl, Duration::from_secs(90));

        let err = config_from(&[("KINSYNC_PRESENCE_TTL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("KINSYNC_PRESENCE_TTL_SECS"));
        assert!(config_from(&[("KINSYNC_PRESENCE_TTL_SECS", "soon")]).is_err());
    }

    #[test]
    fn port_is_a_bind_shortcut() {
        let config = config_from(&[("PORT", "8080")]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");

        let config = config_from(&[("PORT", "8080"), ("KINSYNC_API_BIND_ADDR", "10.0.0.1:1")])
            .unwrap();
        assert_eq!(config.bind_addr, "10.0.0.1:1");

        assert!(config_from(&[("PORT", "http")]).is_err());
    }

    #[test]
    fn body_limit_is_range_checked() {
        let err = config_from(&[("KINSYNC_BODY_LIMIT_BYTES", "12")]).unwrap_err();
        assert!(err.to_string().contains("KINSYNC_BODY_LIMIT_BYTES"));
        assert!(config_from(&[("KINSYNC_BODY_LIMIT_BYTES", "2048")]).is_ok());
    }

    #[test]
    fn search_urls_must_be_http() {
        let err = config_from(&[("KINSYNC_WIKIPEDIA_API_URL", "wiki.local")]).unwrap_err();
        assert!(err.to_string().contains("KINSYNC_WIKIPEDIA_API_URL"));
        assert!(config_from(&[("KINSYNC_SEARCH_TIMEOUT_SECS", "0")]).is_err());
    }
}
