//! Client configuration
//!
//! Base origins for the REST API and the streaming endpoints, plus the
//! timeout and reconnect knobs shared by every subscription. Values resolve
//! in order: explicit override, environment variable, hardcoded default.

use crate::error::{AppError, Result};
use std::time::Duration;
use url::Url;

/// Default REST API origin
pub const DEFAULT_API_URL: &str = "https://api.algodash.io";
/// Default SSE streaming origin
pub const DEFAULT_STREAM_URL: &str = "https://stream.algodash.io";
/// Default WebSocket origin
pub const DEFAULT_WS_URL: &str = "wss://stream.algodash.io";

/// Reconnect policy for live channels: bounded exponential backoff,
/// doubling from `base_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based). Doubles per attempt,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    /// Whether another reconnect attempt is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// Configuration shared by the REST client and every live subscription
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API origin
    pub api_url: String,
    /// SSE streaming origin
    pub stream_url: String,
    /// WebSocket origin (legacy transport)
    pub ws_url: String,
    /// Timeout for REST requests
    pub request_timeout: Duration,
    /// How long a connection may go unacknowledged before a closed
    /// transport is classified as an authentication failure
    pub connect_ack_timeout: Duration,
    /// Application-level ping interval on the WebSocket transport
    pub heartbeat_interval: Duration,
    /// Fixed timer for the REST polling fallback
    pub poll_interval: Duration,
    /// Reconnect policy for live channels
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_ack_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Build a config from the environment, falling back to the default
    /// origins. Recognized variables: `ALGODASH_API_URL`,
    /// `ALGODASH_STREAM_URL`, `ALGODASH_WS_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ALGODASH_API_URL") {
            config.api_url = url;
        }
        if let Ok(url) = std::env::var("ALGODASH_STREAM_URL") {
            config.stream_url = url;
        }
        if let Ok(url) = std::env::var("ALGODASH_WS_URL") {
            config.ws_url = url;
        }
        config
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Validate that every configured origin parses as an absolute URL.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("api_url", &self.api_url),
            ("stream_url", &self.stream_url),
            ("ws_url", &self.ws_url),
        ] {
            Url::parse(value)
                .map_err(|e| AppError::Config(format!("invalid {}: {} ({})", name, value, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        // 16s would exceed the cap
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_attempt_budget() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(1));
        assert!(policy.allows(5));
        assert!(!policy.allows(6));
    }

    #[test]
    fn test_default_origins_are_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let config = ClientConfig::default().with_api_url("not a url");
        assert!(config.validate().is_err());
    }
}
