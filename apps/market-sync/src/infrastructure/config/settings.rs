//! Client Configuration Settings
//!
//! Connection settings for the market data client, loaded from environment
//! variables. Export parameters come from the command line instead.

use std::time::Duration;

use crate::domain::chart::DEFAULT_VIEW_WIDTH;

/// Default market data front.
pub const DEFAULT_MARKET_URL: &str = "wss://openmd.shinnytech.com/t/md/front/mobile";

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the market data front.
    pub url: String,
    /// Wait between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Reconnection attempts before the connection is dead (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Reset the attempt counter after every successful open.
    pub reconnect_reset_on_open: bool,
    /// Silence after which the socket is dropped.
    pub heartbeat_timeout: Duration,
    /// Default chart window size.
    pub view_width: u32,
    /// Prometheus metrics port (0 = no HTTP listener).
    pub metrics_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MARKET_URL.to_string(),
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_attempts: 3,
            reconnect_reset_on_open: false,
            heartbeat_timeout: Duration::from_millis(11_000),
            view_width: DEFAULT_VIEW_WIDTH,
            metrics_port: 0,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but invalid in a way a default
    /// cannot paper over (empty URL, non-WebSocket scheme).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let url = match std::env::var("MARKET_SYNC_URL") {
            Ok(url) => validate_url(url)?,
            Err(_) => defaults.url,
        };

        Ok(Self {
            url,
            reconnect_interval: parse_env_duration_millis(
                "MARKET_SYNC_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval,
            ),
            max_reconnect_attempts: parse_env_u32(
                "MARKET_SYNC_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_reset_on_open: parse_env_bool(
                "MARKET_SYNC_RECONNECT_RESET_ON_OPEN",
                defaults.reconnect_reset_on_open,
            ),
            heartbeat_timeout: parse_env_duration_millis(
                "MARKET_SYNC_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout,
            ),
            view_width: parse_env_u32("MARKET_SYNC_VIEW_WIDTH", defaults.view_width),
            metrics_port: parse_env_u16("MARKET_SYNC_METRICS_PORT", defaults.metrics_port),
        })
    }

    /// Override the front URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL does not use a WebSocket scheme.
    #[error("invalid market data URL {0}: expected ws:// or wss://")]
    InvalidUrl(String),
}

fn validate_url(url: String) -> Result<String, ConfigError> {
    let url = url.trim().to_string();
    if url.is_empty() {
        return Err(ConfigError::EmptyValue("MARKET_SYNC_URL".to_string()));
    }
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ConfigError::InvalidUrl(url));
    }
    Ok(url)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
