//! Facebook Messenger integration
//!
//! Parses Page webhook payloads into normalized events and sends replies
//! through the Graph Send API.

use async_trait::async_trait;
use serde::Deserialize;

use super::{EventContent, NormalizedEvent, Platform, PlatformClient};
use crate::{Error, Result};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

/// Extract the Page id the webhook batch was delivered to
///
/// Facebook carries it as `entry[].id`; one batch never mixes Pages, so the
/// first entry decides the receiving channel.
#[must_use]
pub fn destination(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("entry")
        .and_then(serde_json::Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("id"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Parse a Facebook Page webhook payload into normalized events
///
/// Delivery/read receipts, postbacks, and echoes of the Page's own sends
/// are skipped.
#[must_use]
pub fn parse_webhook(payload: &serde_json::Value) -> Vec<NormalizedEvent> {
    if payload.get("object").and_then(serde_json::Value::as_str) != Some("page") {
        return Vec::new();
    }
    let Some(entries) = payload.get("entry").and_then(serde_json::Value::as_array) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for entry in entries {
        let Some(messagings) = entry.get("messaging").and_then(serde_json::Value::as_array) else {
            continue;
        };

        for raw in messagings {
            let Ok(messaging) = serde_json::from_value::<FacebookMessaging>(raw.clone()) else {
                tracing::debug!("skipping unparseable Facebook messaging entry");
                continue;
            };
            let Some(message) = messaging.message else {
                continue;
            };
            if message.is_echo {
                continue;
            }

            let attachment_url = message
                .attachments
                .as_ref()
                .and_then(|attachments| attachments.first())
                .and_then(|attachment| attachment.payload.as_ref())
                .and_then(|payload| payload.url.clone());

            let content = if message.attachments.is_some() {
                EventContent::Image {
                    url: attachment_url,
                }
            } else if let Some(text) = message.text {
                EventContent::Text { text }
            } else {
                continue;
            };

            results.push(NormalizedEvent {
                platform: Platform::Facebook,
                platform_user_id: messaging.sender.id,
                message_id: message.mid,
                timestamp: messaging.timestamp.unwrap_or_default(),
                content,
                raw: raw.clone(),
                profile_hint: None,
            });
        }
    }

    results
}

/// One messaging item in a Page webhook entry
#[derive(Debug, Deserialize)]
struct FacebookMessaging {
    sender: FacebookSender,
    timestamp: Option<i64>,
    message: Option<FacebookMessage>,
}

#[derive(Debug, Deserialize)]
struct FacebookSender {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FacebookMessage {
    mid: String,
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
    attachments: Option<Vec<FacebookAttachment>>,
}

#[derive(Debug, Deserialize)]
struct FacebookAttachment {
    payload: Option<FacebookAttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct FacebookAttachmentPayload {
    url: Option<String>,
}

/// Client for one Page's Graph Send API
pub struct FacebookClient {
    client: reqwest::Client,
    access_token: String,
}

impl FacebookClient {
    /// Create a client for a Page access token
    #[must_use]
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
        }
    }
}

#[async_trait]
impl PlatformClient for FacebookClient {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "recipient": { "id": recipient_id },
            "messaging_type": "RESPONSE",
            "message": { "text": text },
        });

        let response = self
            .client
            .post(format!("{GRAPH_BASE}/me/messages"))
            .query(&[("access_token", self.access_token.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("Facebook send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "Facebook send error {status}: {body}"
            )));
        }

        tracing::debug!(to = recipient_id, "Facebook message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_webhook() -> serde_json::Value {
        serde_json::json!({
            "object": "page",
            "entry": [
                {
                    "id": "page-1",
                    "time": 1_700_000_000_000_i64,
                    "messaging": [
                        {
                            "sender": { "id": "fb-user-1" },
                            "recipient": { "id": "page-1" },
                            "timestamp": 1_700_000_000_000_i64,
                            "message": { "mid": "mid-1", "text": "สนใจโปรโมชั่นค่ะ" }
                        },
                        {
                            "sender": { "id": "page-1" },
                            "recipient": { "id": "fb-user-1" },
                            "timestamp": 1_700_000_000_001_i64,
                            "message": { "mid": "mid-2", "text": "echo of our reply", "is_echo": true }
                        },
                        {
                            "sender": { "id": "fb-user-2" },
                            "recipient": { "id": "page-1" },
                            "timestamp": 1_700_000_000_002_i64,
                            "delivery": { "mids": ["mid-1"] }
                        },
                        {
                            "sender": { "id": "fb-user-3" },
                            "recipient": { "id": "page-1" },
                            "timestamp": 1_700_000_000_003_i64,
                            "message": {
                                "mid": "mid-3",
                                "attachments": [
                                    { "type": "image", "payload": { "url": "https://cdn.fbsbx.com/photo.jpg" } }
                                ]
                            }
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_destination_is_first_entry_id() {
        assert_eq!(destination(&sample_webhook()), Some("page-1".to_string()));
        assert_eq!(destination(&serde_json::json!({"object": "page"})), None);
    }

    #[test]
    fn test_parse_skips_echo_and_receipts() {
        let events = parse_webhook(&sample_webhook());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].platform_user_id, "fb-user-1");
        assert_eq!(
            events[0].content,
            EventContent::Text {
                text: "สนใจโปรโมชั่นค่ะ".to_string()
            }
        );
        assert_eq!(events[1].platform_user_id, "fb-user-3");
        assert_eq!(
            events[1].content,
            EventContent::Image {
                url: Some("https://cdn.fbsbx.com/photo.jpg".to_string())
            }
        );
    }

    #[test]
    fn test_non_page_object_yields_no_events() {
        let payload = serde_json::json!({
            "object": "instagram",
            "entry": [{ "id": "ig-1", "messaging": [] }]
        });

        assert!(parse_webhook(&payload).is_empty());
    }

    #[test]
    fn test_raw_event_is_preserved() {
        let events = parse_webhook(&sample_webhook());

        assert_eq!(events[0].raw["recipient"]["id"], "page-1");
        assert_eq!(events[0].raw["message"]["mid"], "mid-1");
    }
}
