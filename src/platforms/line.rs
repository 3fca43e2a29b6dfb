//! LINE Messaging API integration
//!
//! Parses LINE webhook payloads into normalized events and pushes replies
//! through the Messaging API. Signature verification lives in
//! [`super::signature`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{EventContent, NormalizedEvent, Platform, PlatformClient, UserProfile};
use crate::{Error, Result};

const API_BASE: &str = "https://api.line.me";
const API_DATA_BASE: &str = "https://api-data.line.me";

/// Profile enrichment is best-effort and must not stall the pipeline
const PROFILE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extract the bot account id the webhook batch was delivered to
///
/// LINE carries it as a top-level `destination` field. The receiving channel
/// (and with it the verification secret) is selected from this value before
/// the signature is checked.
#[must_use]
pub fn destination(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("destination")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Parse a LINE webhook payload into normalized events
///
/// Non-message events (follow, unfollow, postback, ...), unsupported message
/// types, and messages without a sender id are skipped.
#[must_use]
pub fn parse_webhook(payload: &serde_json::Value) -> Vec<NormalizedEvent> {
    let Some(events) = payload.get("events").and_then(serde_json::Value::as_array) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for raw in events {
        let Ok(event) = serde_json::from_value::<LineEvent>(raw.clone()) else {
            tracing::debug!("skipping unparseable LINE event");
            continue;
        };

        if event.event_type != "message" {
            continue;
        }
        let Some(message) = event.message else {
            continue;
        };
        let Some(user_id) = event.source.and_then(|s| s.user_id) else {
            tracing::debug!("skipping LINE message without a user id");
            continue;
        };

        let content = match message.message_type.as_str() {
            "text" => EventContent::Text {
                text: message.text.unwrap_or_default(),
            },
            "image" => EventContent::Image {
                url: Some(format!(
                    "{API_DATA_BASE}/v2/bot/message/{}/content",
                    message.id
                )),
            },
            "sticker" => EventContent::Sticker {
                package_id: message.package_id.unwrap_or_default(),
                sticker_id: message.sticker_id.unwrap_or_default(),
            },
            other => {
                tracing::debug!(message_type = other, "skipping unsupported LINE message type");
                continue;
            }
        };

        results.push(NormalizedEvent {
            platform: Platform::Line,
            platform_user_id: user_id,
            message_id: message.id,
            timestamp: event.timestamp.unwrap_or_default(),
            content,
            raw: raw.clone(),
            profile_hint: None,
        });
    }

    results
}

/// One event in a LINE webhook batch
#[derive(Debug, Deserialize)]
struct LineEvent {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: Option<i64>,
    source: Option<LineSource>,
    message: Option<LineMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineSource {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineMessage {
    id: String,
    #[serde(rename = "type")]
    message_type: String,
    text: Option<String>,
    package_id: Option<String>,
    sticker_id: Option<String>,
}

/// Client for one LINE channel's Messaging API
pub struct LineClient {
    client: reqwest::Client,
    access_token: String,
}

impl LineClient {
    /// Create a client for a channel access token
    #[must_use]
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
        }
    }
}

#[async_trait]
impl PlatformClient for LineClient {
    fn platform(&self) -> Platform {
        Platform::Line
    }

    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "to": recipient_id,
            "messages": [{ "type": "text", "text": text }],
        });

        let response = self
            .client
            .post(format!("{API_BASE}/v2/bot/message/push"))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("LINE push failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!("LINE push error {status}: {body}")));
        }

        tracing::debug!(to = recipient_id, "LINE message sent");
        Ok(())
    }

    async fn fetch_profile(&self, platform_user_id: &str) -> Result<Option<UserProfile>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ProfileResponse {
            display_name: String,
            picture_url: Option<String>,
        }

        let url = format!("{API_BASE}/v2/bot/profile/{platform_user_id}");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .timeout(PROFILE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "LINE profile not available");
            return Ok(None);
        }

        let profile: ProfileResponse = response.json().await?;
        Ok(Some(UserProfile {
            display_name: profile.display_name,
            avatar_url: profile.picture_url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_webhook() -> serde_json::Value {
        serde_json::json!({
            "destination": "U-bot-account",
            "events": [
                {
                    "type": "message",
                    "timestamp": 1_700_000_000_000_i64,
                    "source": { "type": "user", "userId": "U-customer-1" },
                    "replyToken": "reply-1",
                    "message": { "id": "m1", "type": "text", "text": "ราคาทำเลเซอร์เท่าไหร่" }
                },
                {
                    "type": "follow",
                    "timestamp": 1_700_000_000_001_i64,
                    "source": { "type": "user", "userId": "U-customer-2" }
                },
                {
                    "type": "message",
                    "timestamp": 1_700_000_000_002_i64,
                    "source": { "type": "user", "userId": "U-customer-3" },
                    "message": { "id": "m2", "type": "sticker", "packageId": "446", "stickerId": "1988" }
                },
                {
                    "type": "message",
                    "timestamp": 1_700_000_000_003_i64,
                    "source": { "type": "group" },
                    "message": { "id": "m3", "type": "text", "text": "no user id" }
                },
                {
                    "type": "message",
                    "timestamp": 1_700_000_000_004_i64,
                    "source": { "type": "user", "userId": "U-customer-4" },
                    "message": { "id": "m4", "type": "image" }
                }
            ]
        })
    }

    #[test]
    fn test_destination_extraction() {
        assert_eq!(
            destination(&sample_webhook()),
            Some("U-bot-account".to_string())
        );
        assert_eq!(destination(&serde_json::json!({"events": []})), None);
    }

    #[test]
    fn test_parse_keeps_only_message_events_with_user_ids() {
        let events = parse_webhook(&sample_webhook());

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].platform_user_id, "U-customer-1");
        assert_eq!(
            events[0].content,
            EventContent::Text {
                text: "ราคาทำเลเซอร์เท่าไหร่".to_string()
            }
        );
        assert_eq!(events[0].message_id, "m1");
        assert_eq!(events[0].timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_sticker_and_image() {
        let events = parse_webhook(&sample_webhook());

        assert_eq!(
            events[1].content,
            EventContent::Sticker {
                package_id: "446".to_string(),
                sticker_id: "1988".to_string()
            }
        );
        assert_eq!(
            events[2].content,
            EventContent::Image {
                url: Some("https://api-data.line.me/v2/bot/message/m4/content".to_string())
            }
        );
    }

    #[test]
    fn test_parse_preserves_raw_event() {
        let events = parse_webhook(&sample_webhook());

        assert_eq!(events[0].raw["replyToken"], "reply-1");
        assert_eq!(events[0].raw["message"]["id"], "m1");
    }

    #[test]
    fn test_empty_payload_yields_no_events() {
        assert!(parse_webhook(&serde_json::json!({})).is_empty());
        assert!(parse_webhook(&serde_json::json!({"events": []})).is_empty());
    }
}
