//! Runtime configuration read from the environment.
//!
//! - `TRACKER_API_URL` (required): base URL of the workflow store
//! - `TRACKER_STREAM_URL`: push endpoint, defaults to `{api}/notifications/stream/`
//! - `TRACKER_ACCESS_TOKEN`: bearer credential for requests and the push subscription
//! - `TRACKER_WORKING_DIR`: where `.tracker/settings.json` lives, defaults to the current dir
//! - `TRACKER_SETTLE_DELAY_MS`, `TRACKER_RECONNECT_INTERVAL_MS`, `TRACKER_REQUEST_TIMEOUT_SECS`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::notifications::DEFAULT_RECONNECT_INTERVAL;
use crate::workflow::DEFAULT_SETTLE_DELAY;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },

    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub stream_url: String,
    pub access_token: Option<String>,
    pub working_dir: PathBuf,
    pub settle_delay: Duration,
    pub reconnect_interval: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("TRACKER_API_URL").ok_or(ConfigError::Missing("TRACKER_API_URL"))?;
        let api_url = validate_url("TRACKER_API_URL", &api_url)?;

        let stream_url = match get("TRACKER_STREAM_URL") {
            Some(url) => validate_url("TRACKER_STREAM_URL", &url)?,
            None => format!("{}/notifications/stream/", api_url),
        };

        let working_dir = get("TRACKER_WORKING_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(var) {
                Some(value) => parse_u64(var, &value).map(Duration::from_millis),
                None => Ok(default),
            }
        };
        let settle_delay = millis("TRACKER_SETTLE_DELAY_MS", DEFAULT_SETTLE_DELAY)?;
        let reconnect_interval =
            millis("TRACKER_RECONNECT_INTERVAL_MS", DEFAULT_RECONNECT_INTERVAL)?;
        let request_timeout = match get("TRACKER_REQUEST_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_u64("TRACKER_REQUEST_TIMEOUT_SECS", &value)?),
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        Ok(Self {
            api_url,
            stream_url,
            access_token: get("TRACKER_ACCESS_TOKEN"),
            working_dir,
            settle_delay,
            reconnect_interval,
            request_timeout,
        })
    }
}

/// Parse and strip trailing slashes.
fn validate_url(var: &'static str, value: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        var,
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            var,
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn api_url_is_required() {
        assert_eq!(
            config(&[]).unwrap_err(),
            ConfigError::Missing("TRACKER_API_URL")
        );
        assert_eq!(
            config(&[("TRACKER_API_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("TRACKER_API_URL")
        );
    }

    #[test]
    fn defaults_fill_the_rest() {
        let config = config(&[("TRACKER_API_URL", "https://pm.example.com/api/")]).unwrap();
        assert_eq!(config.api_url, "https://pm.example.com/api");
        assert_eq!(
            config.stream_url,
            "https://pm.example.com/api/notifications/stream/"
        );
        assert_eq!(config.access_token, None);
        assert_eq!(config.settle_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("TRACKER_API_URL", "http://localhost:8000"),
            ("TRACKER_STREAM_URL", "http://localhost:8001/events"),
            ("TRACKER_ACCESS_TOKEN", "secret"),
            ("TRACKER_WORKING_DIR", "/tmp/tracker"),
            ("TRACKER_SETTLE_DELAY_MS", "250"),
            ("TRACKER_RECONNECT_INTERVAL_MS", "2000"),
            ("TRACKER_REQUEST_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.stream_url, "http://localhost:8001/events");
        assert_eq!(config.access_token.as_deref(), Some("secret"));
        assert_eq!(config.working_dir, PathBuf::from("/tmp/tracker"));
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            config(&[("TRACKER_API_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { var: "TRACKER_API_URL", .. })
        ));
        assert!(matches!(
            config(&[("TRACKER_API_URL", "ftp://files.example.com")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert_eq!(
            config(&[
                ("TRACKER_API_URL", "http://localhost"),
                ("TRACKER_SETTLE_DELAY_MS", "-1"),
            ])
            .unwrap_err(),
            ConfigError::InvalidNumber {
                var: "TRACKER_SETTLE_DELAY_MS",
                value: "-1".to_string(),
            }
        );
    }
}
