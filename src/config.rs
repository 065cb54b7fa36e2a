//! Client configuration
//!
//! Defaults, environment overrides (`LEAFCHECK_*`) and overrides persisted in the
//! settings table, applied in that order.

use std::path::PathBuf;
use std::time::Duration;

use crate::database::manager::default_db_path;
use crate::database::AllSettings;

pub const ENV_PREDICT_URL: &str = "LEAFCHECK_PREDICT_URL";
pub const ENV_HISTORY_URL: &str = "LEAFCHECK_HISTORY_URL";
pub const ENV_BASE_URL: &str = "LEAFCHECK_BASE_URL";
pub const ENV_CACHE_PATH: &str = "LEAFCHECK_CACHE_PATH";
pub const ENV_POLL_INTERVAL_MS: &str = "LEAFCHECK_POLL_INTERVAL_MS";

/// Endpoint and timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub predict_url: String,
    pub history_url: String,
    /// Origin that serves uploaded history images
    pub base_url: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub health_poll_interval: Duration,
    pub reconcile_interval: Duration,
    pub cache_path: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            predict_url: "http://localhost:8000/predict".to_string(),
            history_url: "http://localhost:5000/history".to_string(),
            base_url: "http://localhost:5000".to_string(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            health_poll_interval: Duration::from_secs(15),
            reconcile_interval: Duration::from_secs(60),
            cache_path: default_db_path(),
        }
    }
}

impl DetectorConfig {
    /// Defaults overridden by `LEAFCHECK_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; blank values are ignored
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get(ENV_PREDICT_URL) {
            self.predict_url = url;
        }
        if let Some(url) = get(ENV_HISTORY_URL) {
            self.history_url = url;
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(path) = get(ENV_CACHE_PATH) {
            self.cache_path = PathBuf::from(path);
        }
        if let Some(raw) = get(ENV_POLL_INTERVAL_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.health_poll_interval = Duration::from_millis(ms),
                _ => log::warn!("Ignoring invalid {}: {}", ENV_POLL_INTERVAL_MS, raw),
            }
        }

        self
    }

    /// Apply overrides persisted in the settings table
    pub fn apply_settings(&mut self, settings: &AllSettings) {
        if let Some(url) = &settings.predict_url {
            self.predict_url = url.clone();
        }
        if let Some(url) = &settings.history_url {
            self.history_url = url.clone();
        }
        if let Some(url) = &settings.base_url {
            self.base_url = url.clone();
        }
        if let Some(ms) = settings.health_poll_interval_ms.filter(|ms| *ms > 0) {
            self.health_poll_interval = Duration::from_millis(ms);
        }
    }

    /// Liveness endpoint: the predict URL with its last path segment replaced by `ping`
    pub fn liveness_url(&self) -> String {
        liveness_url_for(&self.predict_url)
    }
}

fn liveness_url_for(predict_url: &str) -> String {
    let trimmed = predict_url.trim_end_matches('/');
    let scheme_end = trimmed.find("://").map(|i| i + 3).unwrap_or(0);

    match trimmed[scheme_end..].rfind('/') {
        Some(idx) => format!("{}/ping", &trimmed[..scheme_end + idx]),
        None => format!("{}/ping", trimmed),
    }
}
