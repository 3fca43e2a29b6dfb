//! Messaging platform integrations
//!
//! Each platform module parses its webhook payload into [`NormalizedEvent`]s
//! and provides a [`PlatformClient`] for outbound delivery.

pub mod facebook;
pub mod line;
pub mod signature;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use facebook::FacebookClient;
pub use line::LineClient;

use crate::Result;

/// Supported messaging platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Line,
    Facebook,
}

impl Platform {
    /// Stable string tag, matches the webhook path segment
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Facebook => "facebook",
        }
    }

    /// Parse a platform tag (webhook path segment, database column)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Self::Line),
            "facebook" => Some(Self::Facebook),
            _ => None,
        }
    }

    /// Placeholder display name when profile enrichment is unavailable
    #[must_use]
    pub const fn default_display_name(self) -> &'static str {
        match self {
            Self::Line => "LINE User",
            Self::Facebook => "Facebook User",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message content carried by a normalized webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventContent {
    Text {
        text: String,
    },
    /// Image message; `url` points at the platform's content endpoint or CDN
    Image {
        url: Option<String>,
    },
    Sticker {
        package_id: String,
        sticker_id: String,
    },
}

impl EventContent {
    /// Text to persist for this content
    ///
    /// Non-text messages are stored with a placeholder; the original payload
    /// stays available through the raw event.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { .. } | Self::Sticker { .. } => "[Non-text message]".to_string(),
        }
    }

    /// The user's text, when this is a text message
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Profile details a platform exposes for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A platform webhook event reduced to the shape the pipeline consumes
///
/// Webhook noise (delivery receipts, follows, read receipts, postbacks)
/// never becomes a `NormalizedEvent`.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub platform: Platform,
    pub platform_user_id: String,
    /// Platform-assigned message id, for logging and dedupe
    pub message_id: String,
    /// Platform timestamp, epoch milliseconds
    pub timestamp: i64,
    pub content: EventContent,
    /// The platform event verbatim, persisted alongside the message
    pub raw: serde_json::Value,
    /// Profile details embedded in the payload, when the platform sends any
    pub profile_hint: Option<UserProfile>,
}

/// Outbound operations against one platform account
///
/// Implementations hold the channel's access token. Tests substitute
/// recording doubles, so nothing in the pipeline talks to the network
/// directly.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Which platform this client speaks to
    fn platform(&self) -> Platform;

    /// Push a text message to a platform user
    ///
    /// # Errors
    ///
    /// Returns error if the platform API rejects the send
    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()>;

    /// Fetch the user's profile, when the platform supports it
    ///
    /// # Errors
    ///
    /// Returns error if the platform API call fails
    async fn fetch_profile(&self, _platform_user_id: &str) -> Result<Option<UserProfile>> {
        Ok(None)
    }
}

/// Builds a [`PlatformClient`] for a connected channel's credentials
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, platform: Platform, access_token: &str) -> Arc<dyn PlatformClient>;
}

/// Factory producing real HTTP clients
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory;

impl HttpClientFactory {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ClientFactory for HttpClientFactory {
    fn client_for(&self, platform: Platform, access_token: &str) -> Arc<dyn PlatformClient> {
        match platform {
            Platform::Line => Arc::new(LineClient::new(access_token.to_string())),
            Platform::Facebook => Arc::new(FacebookClient::new(access_token.to_string())),
        }
    }
}
