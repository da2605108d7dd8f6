//! Configuration for the backend gateway and the query cache
//!
//! Settings are layered: built-in defaults, then an optional `resourcehub.toml`
//! in the working directory, then `RESOURCEHUB_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::CachePolicy;

const ENV_PREFIX: &str = "RESOURCEHUB";
const CONFIG_FILE: &str = "resourcehub";
const DEFAULT_URL: &str = "http://localhost:54321";

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or did not deserialize
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value was read but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Type alias for Result with ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the hosted backend
    pub url: String,
    /// Public (anonymous) API key
    pub anon_key: String,
    /// Where to persist the signed-in session between runs
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Cache entries older than this are refetched; unset means never
    #[serde(default)]
    pub cache_stale_secs: Option<u64>,
    /// Serve stale entries while refreshing them in the background
    pub cache_background_refetch: bool,
}

impl GatewayConfig {
    /// Load the configuration from `resourcehub.toml` and the environment
    ///
    /// # Environment Variables
    /// - `RESOURCEHUB_URL`: backend base URL (default: "http://localhost:54321")
    /// - `RESOURCEHUB_ANON_KEY`: public API key (required)
    /// - `RESOURCEHUB_SESSION_FILE`: session persistence file (default: none)
    /// - `RESOURCEHUB_REQUEST_TIMEOUT_SECS`: request timeout (default: 30)
    /// - `RESOURCEHUB_CACHE_STALE_SECS`: cache staleness window (default: none)
    /// - `RESOURCEHUB_CACHE_BACKGROUND_REFETCH`: background refresh (default: false)
    pub fn from_env() -> ConfigResult<Self> {
        let settings = Config::builder()
            .set_default("url", DEFAULT_URL)?
            .set_default("request_timeout_secs", 30)?
            .set_default("cache_background_refetch", false)?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: GatewayConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for the given endpoint with default settings
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            session_file: None,
            request_timeout_secs: 30,
            cache_stale_secs: None,
            cache_background_refetch: false,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::Invalid("anon_key must not be empty".to_string()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "url must be an http(s) URL, got '{}'",
                self.url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cache policy described by this configuration
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            stale_time: self.cache_stale_secs.map(Duration::from_secs),
            refetch_in_background: self.cache_background_refetch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 6] = [
        "RESOURCEHUB_URL",
        "RESOURCEHUB_ANON_KEY",
        "RESOURCEHUB_SESSION_FILE",
        "RESOURCEHUB_REQUEST_TIMEOUT_SECS",
        "RESOURCEHUB_CACHE_STALE_SECS",
        "RESOURCEHUB_CACHE_BACKGROUND_REFETCH",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_gateway_config_from_env_defaults() {
        clear_env();
        unsafe {
            std::env::set_var("RESOURCEHUB_ANON_KEY", "anon-test-key");
        }

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.anon_key, "anon-test-key");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.session_file.is_none());
        assert_eq!(config.cache_policy(), CachePolicy::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_gateway_config_from_env_with_custom_values() {
        clear_env();
        unsafe {
            std::env::set_var("RESOURCEHUB_URL", "https://hub.example.co/");
            std::env::set_var("RESOURCEHUB_ANON_KEY", "anon-test-key");
            std::env::set_var("RESOURCEHUB_SESSION_FILE", "/tmp/hub-session.json");
            std::env::set_var("RESOURCEHUB_REQUEST_TIMEOUT_SECS", "5");
            std::env::set_var("RESOURCEHUB_CACHE_STALE_SECS", "60");
            std::env::set_var("RESOURCEHUB_CACHE_BACKGROUND_REFETCH", "true");
        }

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.base_url(), "https://hub.example.co");
        assert_eq!(
            config.session_file,
            Some(PathBuf::from("/tmp/hub-session.json"))
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        let policy = config.cache_policy();
        assert_eq!(policy.stale_time, Some(Duration::from_secs(60)));
        assert!(policy.refetch_in_background);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_gateway_config_requires_anon_key() {
        clear_env();
        assert!(GatewayConfig::from_env().is_err());

        unsafe {
            std::env::set_var("RESOURCEHUB_ANON_KEY", "  ");
        }
        assert!(matches!(
            GatewayConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));

        clear_env();
    }
}
