//! Error types for the Aura relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Webhook signature missing, undecodable, or mismatched
    #[error("authentication error: {0}")]
    Auth(String),

    /// Webhook received for a platform the relay does not speak
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No connected channel matches the destination account in the payload
    #[error("channel not configured: {0}")]
    ChannelNotConfigured(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or rejected request input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Embedding service error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Generation model error
    #[error("generation error: {0}")]
    Generation(String),

    /// Outbound platform delivery error
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Reply queue unavailable or saturated
    #[error("queue error: {0}")]
    Queue(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
