//! Application configuration
//!
//! Read from environment variables (a `.env` file is loaded first by the
//! binary). Only the API base URL is required.

use crate::sync::{ApiConfig, BoundedQueueConfig, ClearPolicy, SyncApiError, SyncOptions};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 5;
const MAX_SYNC_INTERVAL_MINUTES: u64 = 24 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DB_FILE_NAME: &str = "leira-sync.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Cannot determine data directory, set LEIRA_DB_PATH")]
    NoDataDir,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: Url,
    pub api_key: Option<String>,
    pub probe_url: Url,
    pub db_path: PathBuf,
    pub sync_interval_minutes: u64,
    pub http_timeout: Duration,
    pub auto_flush: bool,
    pub clear_policy: ClearPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("LEIRA_API_URL").ok_or(ConfigError::Missing("LEIRA_API_URL"))?;
        let api_url = parse_url("LEIRA_API_URL", &api_url)?;

        let probe_url = match get("LEIRA_PROBE_URL") {
            Some(url) => parse_url("LEIRA_PROBE_URL", &url)?,
            None => api_url.clone(),
        };

        let db_path = match get("LEIRA_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let sync_interval_minutes = match get("LEIRA_SYNC_INTERVAL_MINUTES") {
            Some(v) => parse_number("LEIRA_SYNC_INTERVAL_MINUTES", &v)?,
            None => DEFAULT_SYNC_INTERVAL_MINUTES,
        };
        if !(1..=MAX_SYNC_INTERVAL_MINUTES).contains(&sync_interval_minutes) {
            return Err(ConfigError::Invalid {
                key: "LEIRA_SYNC_INTERVAL_MINUTES",
                message: format!(
                    "must be between 1 and {}, got {}",
                    MAX_SYNC_INTERVAL_MINUTES, sync_interval_minutes
                ),
            });
        }

        let http_timeout = match get("LEIRA_HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("LEIRA_HTTP_TIMEOUT_SECS", &v)?),
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let auto_flush = match get("LEIRA_AUTO_FLUSH") {
            Some(v) => parse_bool("LEIRA_AUTO_FLUSH", &v)?,
            None => true,
        };

        let clear_policy = match get("LEIRA_CLEAR_POLICY").as_deref() {
            None | Some("all-or-nothing") => ClearPolicy::AllOrNothing,
            Some("per-type") => ClearPolicy::PerType,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LEIRA_CLEAR_POLICY",
                    message: format!("expected all-or-nothing or per-type, got '{}'", other),
                })
            }
        };

        Ok(Self {
            api_url,
            api_key: get("LEIRA_API_KEY"),
            probe_url,
            db_path,
            sync_interval_minutes,
            http_timeout,
            auto_flush,
            clear_policy,
        })
    }

    pub fn api_config(&self) -> Result<ApiConfig, SyncApiError> {
        let mut config = ApiConfig::new(self.api_url.as_str())?;
        config.api_key = self.api_key.clone();
        config.timeout = self.http_timeout;
        Ok(config)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            clear_policy: self.clear_policy,
            auto_flush_on_enqueue: self.auto_flush,
            bounded: BoundedQueueConfig::default(),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }
}

fn default_db_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("br", "leira", "leira-sync")
        .ok_or(ConfigError::NoDataDir)?;
    Ok(dirs.data_dir().join(DB_FILE_NAME))
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("LEIRA_API_URL", "https://yard.example.org/functions/v1"),
            ("LEIRA_DB_PATH", "/tmp/leira.db"),
        ])
        .unwrap();

        assert_eq!(config.probe_url, config.api_url);
        assert_eq!(config.db_path, PathBuf::from("/tmp/leira.db"));
        assert_eq!(config.sync_interval_minutes, 5);
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.auto_flush);
        assert_eq!(config.clear_policy, ClearPolicy::AllOrNothing);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LEIRA_API_URL", "https://yard.example.org/functions/v1"),
            ("LEIRA_API_KEY", "anon-key"),
            ("LEIRA_PROBE_URL", "https://yard.example.org/health"),
            ("LEIRA_DB_PATH", "/tmp/leira.db"),
            ("LEIRA_SYNC_INTERVAL_MINUTES", "15"),
            ("LEIRA_HTTP_TIMEOUT_SECS", "10"),
            ("LEIRA_AUTO_FLUSH", "off"),
            ("LEIRA_CLEAR_POLICY", "per-type"),
        ])
        .unwrap();

        assert_eq!(config.probe_url.path(), "/health");
        assert_eq!(config.sync_interval_minutes, 15);
        assert!(!config.auto_flush);
        assert_eq!(config.clear_policy, ClearPolicy::PerType);

        let api = config.api_config().unwrap();
        assert_eq!(api.api_key.as_deref(), Some("anon-key"));
        assert_eq!(api.timeout, Duration::from_secs(10));
        assert_eq!(api.base_url.as_str(), "https://yard.example.org/functions/v1/");

        let options = config.sync_options();
        assert!(!options.auto_flush_on_enqueue);
    }

    #[test]
    fn test_missing_api_url() {
        let result = config_from(&[("LEIRA_DB_PATH", "/tmp/leira.db")]);
        assert!(matches!(result, Err(ConfigError::Missing("LEIRA_API_URL"))));
    }

    #[test]
    fn test_invalid_values() {
        let base = ("LEIRA_API_URL", "https://yard.example.org");
        let db = ("LEIRA_DB_PATH", "/tmp/leira.db");

        let result = config_from(&[base, db, ("LEIRA_SYNC_INTERVAL_MINUTES", "soon")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "LEIRA_SYNC_INTERVAL_MINUTES", .. })
        ));

        for minutes in ["0", "1441", "9223372036854775807"] {
            let result = config_from(&[base, db, ("LEIRA_SYNC_INTERVAL_MINUTES", minutes)]);
            assert!(matches!(
                result,
                Err(ConfigError::Invalid { key: "LEIRA_SYNC_INTERVAL_MINUTES", .. })
            ));
        }

        let result = config_from(&[base, db, ("LEIRA_CLEAR_POLICY", "never")]);
        assert!(matches!(result, Err(ConfigError::Invalid { key: "LEIRA_CLEAR_POLICY", .. })));

        let result = config_from(&[("LEIRA_API_URL", "not a url"), db]);
        assert!(matches!(result, Err(ConfigError::Invalid { key: "LEIRA_API_URL", .. })));
    }
}
