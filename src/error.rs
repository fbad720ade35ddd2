//! Error types for the balance feed

use thiserror::Error;

use crate::protocol::VenueErrorCode;

/// Balance feed errors
#[derive(Error, Debug)]
pub enum BalanceFeedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Account switch failed: {0}")]
    AccountSwitch(String),

    #[error("Venue error {code:?}: {message}")]
    Venue {
        code: VenueErrorCode,
        message: String,
    },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl From<tokio_tungstenite::tungstenite::Error> for BalanceFeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BalanceFeedError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for BalanceFeedError {
    fn from(err: serde_json::Error) -> Self {
        BalanceFeedError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BalanceFeedError>;
