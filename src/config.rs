//! Pipeline configuration
//!
//! Resolution order: an explicit TOML file, then the `CALMIA_API_URL`
//! environment variable, then compiled defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "CALMIA_API_URL";

/// Longest accepted local cache lifetime (one year)
pub const MAX_CACHE_TTL_HOURS: u64 = 24 * 366;

/// Runtime configuration of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL of the prediction/recommendation service
    pub api_url: String,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Cap on every document store and cache call
    pub store_timeout_secs: u64,
    /// How long to wait for an auth-state event before giving up
    pub auth_timeout_secs: u64,
    /// Attempts of the remote predict/recommend/environment sequence
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub retry_base_delay_ms: u64,
    /// Local cache entry lifetime
    pub cache_ttl_hours: u64,
    /// Directory of the file-backed local cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 30,
            store_timeout_secs: 10,
            auth_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            cache_ttl_hours: 24,
            cache_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load configuration from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let url = reqwest::Url::parse(&self.api_url).map_err(|e| {
            PipelineError::Config(format!("Invalid api_url {:?}: {}", self.api_url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::Config(format!(
                "api_url must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.max_attempts == 0 {
            return Err(PipelineError::Config("max_attempts must be at least 1".to_string()));
        }

        if self.cache_ttl_hours == 0 {
            return Err(PipelineError::Config("cache_ttl_hours must be positive".to_string()));
        }

        if self.cache_ttl_hours > MAX_CACHE_TTL_HOURS {
            return Err(PipelineError::Config(format!(
                "cache_ttl_hours must be at most {MAX_CACHE_TTL_HOURS}, got {}",
                self.cache_ttl_hours
            )));
        }

        if self.is_loopback_api() {
            tracing::warn!(
                api_url = %self.api_url,
                "API URL points at a loopback address; it is unreachable from devices"
            );
        }

        Ok(())
    }

    /// Whether the API URL resolves to the local machine
    pub fn is_loopback_api(&self) -> bool {
        reqwest::Url::parse(&self.api_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .map(|host| host == "localhost" || host == "127.0.0.1" || host == "[::1]")
            .unwrap_or(false)
    }

    /// Join an endpoint path onto the API base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Local cache lifetime, capped at [`MAX_CACHE_TTL_HOURS`]
    pub fn cache_ttl(&self) -> chrono::Duration {
        let hours = self.cache_ttl_hours.min(MAX_CACHE_TTL_HOURS);
        chrono::Duration::hours(hours as i64)
    }
}
