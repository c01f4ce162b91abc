//! Configuration module for the analytics forwarder.
//!
//! This module provides environment-based configuration: the collector
//! endpoint, the obfuscated write-key token, and the grouping settings used
//! by the event buffer.

use std::env;
use std::time::Duration;

/// Default collector base URL
const DEFAULT_ENDPOINT: &str = "https://api.segment.io/v1";

/// Default batch size (number of events per batch)
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default flush interval in seconds
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed batch size
const MAX_BATCH_SIZE: usize = 10_000;

const MIN_FLUSH_INTERVAL_SECS: u64 = 1;

const MAX_FLUSH_INTERVAL_SECS: u64 = 300;

/// Maximum allowed HTTP request timeout in seconds
const MAX_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Configuration for the analytics forwarder.
///
/// All settings can be configured via environment variables:
/// - `ANALYTICS_ENDPOINT`: Collector base URL (default: https://api.segment.io/v1)
/// - `ANALYTICS_TOKEN`: Obfuscated write key (required)
/// - `ANALYTICS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
/// - `ANALYTICS_BATCH_SIZE`: Events per batch (default: 100)
/// - `ANALYTICS_FLUSH_INTERVAL_SECS`: Seconds between flushes (default: 5)
/// - `ANALYTICS_HEARTBEAT_INTERVAL_SECS`: Seconds between heartbeats, 0 disables (default: 0)
#[derive(Clone)]
pub struct Config {
    /// Collector base URL, without a trailing slash
    pub endpoint: String,

    /// Write key as stored in configuration, still obfuscated
    pub token: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Number of events to group before sending a batch
    pub batch_size: usize,

    /// Duration to wait before flushing buffered events, even if batch size not reached
    pub flush_interval: Duration,

    /// Interval between heartbeat events, `None` when disabled
    pub heartbeat_interval: Option<Duration>,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `ANALYTICS_TOKEN` is missing or empty
    /// - `ANALYTICS_ENDPOINT` is not an http(s) URL
    /// - `ANALYTICS_BATCH_SIZE` is not a valid number or exceeds limits
    /// - `ANALYTICS_FLUSH_INTERVAL_SECS` is not a valid number or exceeds limits
    /// - `ANALYTICS_REQUEST_TIMEOUT_SECS` is not a valid number, is 0 or exceeds limits
    /// - `ANALYTICS_HEARTBEAT_INTERVAL_SECS` is not a valid number
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use analytics_forwarder::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Endpoint: {}", config.endpoint);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = Self::parse_endpoint()?;
        let token = Self::parse_token()?;

        let request_timeout = Duration::from_secs(Self::parse_request_timeout()?);
        let batch_size = Self::parse_batch_size()?;
        let flush_interval = Duration::from_secs(Self::parse_flush_interval()?);
        let heartbeat_interval = Self::parse_heartbeat_interval()?;

        Ok(Self {
            endpoint,
            token,
            request_timeout,
            batch_size,
            flush_interval,
            heartbeat_interval,
        })
    }

    fn parse_endpoint() -> Result<String, ConfigError> {
        let env_var = "ANALYTICS_ENDPOINT";
        let endpoint = env::var(env_var).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError {
                message: format!("'{}' is not an http(s) URL", endpoint),
                env_var: Some(env_var.to_string()),
            });
        }

        // Endpoint paths are appended with their leading '/'
        Ok(endpoint.trim_end_matches('/').to_string())
    }

    fn parse_token() -> Result<String, ConfigError> {
        let env_var = "ANALYTICS_TOKEN";

        match env::var(env_var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ConfigError {
                message: "analytics token is required".to_string(),
                env_var: Some(env_var.to_string()),
            }),
        }
    }

    fn parse_request_timeout() -> Result<u64, ConfigError> {
        let env_var = "ANALYTICS_REQUEST_TIMEOUT_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let timeout: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if timeout == 0 {
                    return Err(ConfigError {
                        message: "request timeout must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if timeout > MAX_REQUEST_TIMEOUT_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "request timeout {} exceeds maximum ({}s)",
                            timeout, MAX_REQUEST_TIMEOUT_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(timeout)
            }
            Err(_) => Ok(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Zero or unset disables the heartbeat.
    fn parse_heartbeat_interval() -> Result<Option<Duration>, ConfigError> {
        let env_var = "ANALYTICS_HEARTBEAT_INTERVAL_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;
                Ok((secs > 0).then(|| Duration::from_secs(secs)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Parse batch size from environment variable with validation.
    fn parse_batch_size() -> Result<usize, ConfigError> {
        let env_var = "ANALYTICS_BATCH_SIZE";

        match env::var(env_var) {
            Ok(value) => {
                let batch_size: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if batch_size == 0 {
                    return Err(ConfigError {
                        message: "batch size must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if batch_size > MAX_BATCH_SIZE {
                    return Err(ConfigError {
                        message: format!(
                            "batch size {} exceeds maximum allowed ({})",
                            batch_size, MAX_BATCH_SIZE
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(batch_size)
            }
            Err(_) => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    /// Parse flush interval from environment variable with validation.
    fn parse_flush_interval() -> Result<u64, ConfigError> {
        let env_var = "ANALYTICS_FLUSH_INTERVAL_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let interval: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if interval < MIN_FLUSH_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "flush interval {} is below minimum ({}s)",
                            interval, MIN_FLUSH_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if interval > MAX_FLUSH_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "flush interval {} exceeds maximum ({}s)",
                            interval, MAX_FLUSH_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(interval)
            }
            Err(_) => Ok(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl Default for Config {
    /// Create a default configuration with an empty token.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            heartbeat_interval: None,
        }
    }
}
