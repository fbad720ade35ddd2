//! Configuration module for the balance feed

use serde::Deserialize;
use std::env;

use crate::error::{BalanceFeedError, Result};

/// Feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Venue streaming endpoint (e.g. "wss://stream.example-broker.com/v1")
    pub ws_endpoint: String,

    /// Application identifier the venue expects on the stream URL
    pub app_id: String,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl FeedConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            ws_endpoint: env::var("BROKER_WS_ENDPOINT").unwrap_or_default(),
            app_id: env::var("BROKER_APP_ID").unwrap_or_default(),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            max_reconnect_attempts: env::var("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a connection
    pub fn validate(&self) -> Result<()> {
        if self.ws_endpoint.trim().is_empty() {
            return Err(BalanceFeedError::Config(
                "BROKER_WS_ENDPOINT is not set".to_string(),
            ));
        }
        if !self.ws_endpoint.starts_with("ws://") && !self.ws_endpoint.starts_with("wss://") {
            return Err(BalanceFeedError::Config(format!(
                "BROKER_WS_ENDPOINT must be a ws:// or wss:// URL, got {}",
                self.ws_endpoint
            )));
        }
        if self.app_id.trim().is_empty() {
            return Err(BalanceFeedError::Config(
                "BROKER_APP_ID is not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Streaming URL with the application identifier attached
    ///
    /// Always emits a path after the authority, so a bare
    /// `ws://host:port` endpoint still produces a valid upgrade
    /// request target.
    pub fn stream_url(&self) -> String {
        let base = self.ws_endpoint.trim_end_matches('/');
        let after_scheme = base.find("://").map_or(0, |at| at + 3);
        let (resource, query) = match base[after_scheme..].find('?') {
            Some(at) => base.split_at(after_scheme + at),
            None => (base, ""),
        };
        let root = if resource[after_scheme..].contains('/') {
            ""
        } else {
            "/"
        };
        let sep = if query.is_empty() { "?" } else { "&" };
        format!("{}{}{}{}app={}", resource, root, query, sep, self.app_id)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://stream.tradeflow.dev/v1".to_string(),
            app_id: "tradeflow-dashboard".to_string(),
            reconnect_delay_ms: 5000,
            max_reconnect_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_endpoint() {
        let config = FeedConfig {
            ws_endpoint: String::new(),
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_websocket_scheme() {
        let config = FeedConfig {
            ws_endpoint: "https://stream.tradeflow.dev/v1".to_string(),
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_app_id() {
        let config = FeedConfig {
            app_id: "  ".to_string(),
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_url_appends_app_id() {
        let config = FeedConfig::default();
        assert_eq!(
            config.stream_url(),
            "wss://stream.tradeflow.dev/v1?app=tradeflow-dashboard"
        );
    }

    #[test]
    fn test_stream_url_strips_trailing_slash() {
        let config = FeedConfig {
            ws_endpoint: "wss://stream.tradeflow.dev/v1/".to_string(),
            ..FeedConfig::default()
        };
        assert_eq!(
            config.stream_url(),
            "wss://stream.tradeflow.dev/v1?app=tradeflow-dashboard"
        );
    }

    #[test]
    fn test_stream_url_adds_root_path_to_bare_authority() {
        let config = FeedConfig {
            ws_endpoint: "ws://127.0.0.1:9001".to_string(),
            ..FeedConfig::default()
        };
        assert_eq!(
            config.stream_url(),
            "ws://127.0.0.1:9001/?app=tradeflow-dashboard"
        );
    }

    #[test]
    fn test_stream_url_keeps_root_path_on_trimmed_endpoint() {
        let config = FeedConfig {
            ws_endpoint: "wss://stream.tradeflow.dev/".to_string(),
            ..FeedConfig::default()
        };
        assert_eq!(
            config.stream_url(),
            "wss://stream.tradeflow.dev/?app=tradeflow-dashboard"
        );
    }

    #[test]
    fn test_stream_url_extends_existing_query() {
        let config = FeedConfig {
            ws_endpoint: "wss://stream.tradeflow.dev/v1?region=eu".to_string(),
            ..FeedConfig::default()
        };
        assert_eq!(
            config.stream_url(),
            "wss://stream.tradeflow.dev/v1?region=eu&app=tradeflow-dashboard"
        );
    }
}
