//! Runtime configuration.
//!
//! Loaded from the environment with sensible defaults for local development.
//!
//! # Example
//!
//! ```no_run
//! use biblioteca_sync_runtime::config::SyncConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! println!("Backend: {}", config.api_url);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Backend base URL variable
pub const API_URL_VAR: &str = "BIBLIOTECA_API_URL";
/// Request timeout variable, in whole seconds
pub const REQUEST_TIMEOUT_VAR: &str = "BIBLIOTECA_REQUEST_TIMEOUT_SECS";
/// Optional Prometheus listen address variable
pub const METRICS_ADDR_VAR: &str = "BIBLIOTECA_METRICS_ADDR";

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Settings for the sync runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backend base URL, without the `/api` suffix
    pub api_url: String,
    /// Per-request timeout in seconds, enforced by the HTTP client
    pub request_timeout_secs: u64,
    /// Prometheus listen address; metrics export is off when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            metrics_addr: None,
        }
    }
}

impl SyncConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` to resolve variable names.
    ///
    /// Unset and blank variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = read(API_URL_VAR) {
            config.api_url = url;
        }

        if let Some(secs) = read(REQUEST_TIMEOUT_VAR) {
            config.request_timeout_secs = secs.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    var: REQUEST_TIMEOUT_VAR,
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(addr) = read(METRICS_ADDR_VAR) {
            config.metrics_addr = Some(addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    var: METRICS_ADDR_VAR,
                    reason: e.to_string(),
                }
            })?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not http(s) or the timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must start with http:// or https://, got {:?}",
                self.api_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Set the backend URL (builder pattern)
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the request timeout (builder pattern)
    #[must_use]
    pub const fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Enable metrics export on `addr` (builder pattern)
    #[must_use]
    pub const fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }
}
