//! Error types for lifo-server.

use thiserror::Error;

/// Main error type for all server operations.
#[derive(Debug, Error)]
pub enum LifoError {
    /// I/O error during socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (diagnostics, JSON config).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but is not usable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Protocol error (malformed frame, oversized payload, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection before the request was served.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Wait abandoned because the session was evicted or the server is stopping.
    #[error("Operation cancelled")]
    Cancelled,

    /// Session exceeded its configured lifetime.
    #[error("Session timed out")]
    Timeout,
}

impl LifoError {
    /// Whether this error is an ordinary end of a session rather than a fault.
    pub fn is_session_end(&self) -> bool {
        matches!(
            self,
            LifoError::ConnectionClosed | LifoError::Cancelled | LifoError::Timeout
        )
    }
}

/// Result type alias using LifoError.
pub type Result<T> = std::result::Result<T, LifoError>;
