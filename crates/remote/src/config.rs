//! Configuration types for the remote backend

use serde::{Deserialize, Serialize};

/// Configuration for a remote cache backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Remote endpoint (e.g., "http://cache.example.com/recache")
    pub url: String,

    /// Operation-wide timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Suppress inserts; the remote is only read from
    #[serde(default)]
    pub read_only: bool,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl RemoteConfig {
    /// Derive the remote configuration from the resolved core
    /// configuration. `None` when no remote is configured.
    pub fn from_core(config: &recache_core::Config) -> Option<Self> {
        let url = config.remote_url.clone()?;
        Some(Self {
            url,
            timeout_secs: config.remote_timeout_secs,
            read_only: config.read_only_remote,
            retry: RetryConfig::default(),
        })
    }
}

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// Default value functions
fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_requires_a_url() {
        let config = recache_core::Config::defaults("/tmp/x");
        assert!(RemoteConfig::from_core(&config).is_none());

        let mut with_remote = config;
        with_remote.remote_url = Some("http://cache.example.com".to_string());
        with_remote.remote_timeout_secs = 42;
        with_remote.read_only_remote = true;
        let remote = RemoteConfig::from_core(&with_remote).unwrap();
        assert_eq!(remote.url, "http://cache.example.com");
        assert_eq!(remote.timeout_secs, 42);
        assert!(remote.read_only);
    }

    #[test]
    fn serde_fills_in_defaults() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"url": "http://cache.example.com"}"#).unwrap();
        assert_eq!(config.timeout_secs, default_timeout_secs());
        assert!(!config.read_only);
        assert_eq!(config.retry.max_attempts, default_max_attempts());
    }
}
