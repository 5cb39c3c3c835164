//! Configuration for contextd.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            channel: ChannelConfig::from_env()?,
        })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let host = optional_env("HTTP_HOST")?.unwrap_or_else(|| "0.0.0.0".to_string());

        let port = optional_env("HTTP_PORT")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "HTTP_PORT".to_string(),
                message: format!("must be a port number: {e}"),
            })?
            .unwrap_or(8080);

        Ok(Self { host, port })
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = optional_env("DATABASE_URL")?.ok_or_else(|| ConfigError::MissingRequired {
            key: "database_url".to_string(),
            hint: "Set the DATABASE_URL environment variable (postgres://...)".to_string(),
        })?;

        let pool_size = optional_env("DATABASE_POOL_SIZE")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(10);

        Ok(Self {
            url: SecretString::from(url),
            pool_size,
        })
    }

    /// Get the database URL (exposes the secret).
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

/// Message-channel configuration.
///
/// Topic and group names are passed through to whichever broker adapter is
/// wired in; the in-process backend only uses them for log context.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub request_topic: String,
    pub response_topic: String,
    pub consumer_group: String,
    pub fetch_backoff: Duration,
    pub queue_capacity: usize,
}

impl ChannelConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let enabled = optional_env("CHANNEL_ENABLED")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CHANNEL_ENABLED".to_string(),
                message: format!("must be true or false: {e}"),
            })?
            .unwrap_or(false);

        let request_topic =
            optional_env("CHANNEL_REQUEST_TOPIC")?.unwrap_or_else(|| "context-requests".to_string());
        let response_topic = optional_env("CHANNEL_RESPONSE_TOPIC")?
            .unwrap_or_else(|| "context-responses".to_string());
        let consumer_group =
            optional_env("CHANNEL_CONSUMER_GROUP")?.unwrap_or_else(|| "contextd".to_string());

        let backoff_secs = optional_env("CHANNEL_FETCH_BACKOFF_SECS")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CHANNEL_FETCH_BACKOFF_SECS".to_string(),
                message: format!("must be a number of seconds: {e}"),
            })?
            .unwrap_or(5u64);

        let queue_capacity = optional_env("CHANNEL_QUEUE_CAPACITY")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CHANNEL_QUEUE_CAPACITY".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(256);

        Ok(Self {
            enabled,
            request_topic,
            response_topic,
            consumer_group,
            fetch_backoff: Duration::from_secs(backoff_secs),
            queue_capacity,
        })
    }
}

/// Read an environment variable, treating empty values as absent.
fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(Some(v)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn optional_env_treats_empty_as_absent() {
        // SAFETY: test-local variable name, no concurrent reader cares.
        unsafe { std::env::set_var("CONTEXTD_TEST_EMPTY", "") };
        assert_eq!(optional_env("CONTEXTD_TEST_EMPTY").unwrap(), None);

        unsafe { std::env::set_var("CONTEXTD_TEST_SET", "value") };
        assert_eq!(
            optional_env("CONTEXTD_TEST_SET").unwrap(),
            Some("value".to_string())
        );
    }
}
