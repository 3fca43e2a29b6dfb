//! Platform webhook ingestion
//!
//! `POST /{platform}` runs the inbound pipeline: resolve the destination
//! channel, verify the signature with that channel's secret, normalize the
//! batch, persist each event, and enqueue reply jobs. The response
//! acknowledges persistence only; generation happens on the reply worker.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::{error_response, ApiState, ErrorResponse};
use crate::db::{ConnectedChannel, ContentType, SenderType};
use crate::events::ChangeEvent;
use crate::platforms::{facebook, line, signature, EventContent, NormalizedEvent, Platform, UserProfile};
use crate::worker::ReplyJob;
use crate::Result;

/// Acknowledgment body for an accepted webhook batch
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub events: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build webhooks router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/{platform}", post(receive).get(verify))
        .with_state(state)
}

/// Handle an inbound webhook batch
///
/// Rejections carry no side effects: 400 for an unsupported platform or
/// unusable payload, 404 when no channel is connected for the destination
/// account, 401 when the signature does not match that channel's secret.
/// Once events are accepted, per-event failures are logged and the batch
/// still acknowledges, so the platform does not redeliver what was partly
/// processed.
pub async fn receive(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<WebhookAck>, ApiError> {
    let Some(platform) = Platform::parse(&platform) else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response("unsupported_platform", &format!("unknown platform {platform}")),
        ));
    };

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            error_response("invalid_payload", "body is not valid JSON"),
        )
    })?;

    // The destination account decides which channel's secret verifies the
    // signature, so it resolves before authentication.
    let destination = match platform {
        Platform::Line => line::destination(&payload),
        Platform::Facebook => facebook::destination(&payload),
    };
    let Some(destination) = destination else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response("invalid_payload", "payload has no destination account"),
        ));
    };

    let channel = state
        .channels
        .find_by_account(platform, &destination)
        .map_err(|e| {
            tracing::error!(error = %e, "channel lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_response("internal_error", "channel lookup failed"),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                error_response(
                    "channel_not_configured",
                    &format!("no {platform} channel for account {destination}"),
                ),
            )
        })?;

    if !signature_valid(platform, &channel, &headers, &body) {
        tracing::warn!(platform = %platform, channel_id = %channel.id, "webhook signature rejected");
        return Err((
            StatusCode::UNAUTHORIZED,
            error_response("invalid_signature", "signature verification failed"),
        ));
    }

    let events = match platform {
        Platform::Line => line::parse_webhook(&payload),
        Platform::Facebook => facebook::parse_webhook(&payload),
    };

    tracing::debug!(platform = %platform, events = events.len(), "webhook batch accepted");

    // Events in a batch are independent; one failing must not stall the rest.
    let results = join_all(
        events
            .iter()
            .map(|event| process_event(&state, &channel, event)),
    )
    .await;

    for (event, result) in events.iter().zip(&results) {
        if let Err(e) = result {
            tracing::error!(
                platform = %platform,
                message_id = %event.message_id,
                error = %e,
                "webhook event processing failed"
            );
        }
    }

    Ok(Json(WebhookAck {
        success: true,
        events: events.len(),
    }))
}

/// Endpoint ownership verification
///
/// Facebook probes with the `hub.*` challenge handshake; a token mismatch is
/// 403 so a misconfigured deploy fails subscription instead of silently
/// accepting. LINE has no handshake and just gets a status echo.
pub async fn verify(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return (
            StatusCode::BAD_REQUEST,
            error_response("unsupported_platform", &format!("unknown platform {platform}")),
        )
            .into_response();
    };

    match platform {
        Platform::Facebook => {
            let expected = state.facebook_verify_token.as_deref();
            if params.mode.as_deref() == Some("subscribe")
                && expected.is_some()
                && params.verify_token.as_deref() == expected
            {
                tracing::info!("Facebook webhook verified");
                params.challenge.unwrap_or_default().into_response()
            } else {
                tracing::warn!("Facebook webhook verification rejected");
                (
                    StatusCode::FORBIDDEN,
                    error_response("verification_failed", "verify token mismatch"),
                )
                    .into_response()
            }
        }
        Platform::Line => Json(serde_json::json!({ "status": "ok" })).into_response(),
    }
}

/// Query parameters of the Facebook verification handshake
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Check the batch signature against the receiving channel's secret
///
/// A missing header, an unconfigured secret, or a digest mismatch all fail
/// closed.
fn signature_valid(
    platform: Platform,
    channel: &ConnectedChannel,
    headers: &HeaderMap,
    body: &[u8],
) -> bool {
    let secret = channel.channel_secret.as_deref().unwrap_or("");
    match platform {
        Platform::Line => headers
            .get("x-line-signature")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|sig| signature::verify_line(secret, body, sig)),
        Platform::Facebook => headers
            .get("x-hub-signature-256")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|sig| signature::verify_facebook(secret, body, sig)),
    }
}

/// Run one normalized event through identity resolution, persistence, and
/// reply enqueueing
///
/// Only datastore failures abort the event. Profile enrichment degrades to
/// placeholder naming and queue pressure is shed inside `enqueue`, so
/// neither can lose the inbound message.
async fn process_event(
    state: &ApiState,
    channel: &ConnectedChannel,
    event: &NormalizedEvent,
) -> Result<()> {
    let identity = match state
        .identities
        .find(event.platform, &event.platform_user_id)?
    {
        Some(identity) => identity,
        None => {
            let profile = resolve_profile(state, channel, event).await;
            let display_name = profile.as_ref().map_or_else(
                || event.platform.default_display_name().to_string(),
                |p| p.display_name.clone(),
            );
            let avatar_url = profile.as_ref().and_then(|p| p.avatar_url.as_deref());
            state.identities.create_with_customer(
                event.platform,
                &event.platform_user_id,
                &display_name,
                avatar_url,
            )?
        }
    };

    let conversation = state.conversations.resolve(&identity.id, &channel.id)?;

    let message = state.messages.append(
        &conversation.id,
        SenderType::User,
        content_type(&event.content),
        &event.content.display_text(),
        Some(&event.raw),
    )?;
    state.bus.publish(ChangeEvent::MessageAdded { message });

    // Replies are generated for text messages on AI-owned conversations only
    if conversation.ai_mode {
        if let Some(text) = event.content.as_text() {
            state.queue.enqueue(ReplyJob {
                conversation_id: conversation.id.clone(),
                channel_id: channel.id.clone(),
                platform: event.platform,
                platform_user_id: event.platform_user_id.clone(),
                text: text.to_string(),
            });
        }
    }

    Ok(())
}

/// Best-effort profile enrichment for first contact
///
/// A hint embedded in the payload wins; otherwise the platform is asked.
/// Failure degrades to the platform placeholder name, never to a dropped
/// event.
async fn resolve_profile(
    state: &ApiState,
    channel: &ConnectedChannel,
    event: &NormalizedEvent,
) -> Option<UserProfile> {
    if let Some(hint) = &event.profile_hint {
        return Some(hint.clone());
    }

    let client = state
        .clients
        .client_for(event.platform, &channel.access_token);
    match client.fetch_profile(&event.platform_user_id).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(
                platform = %event.platform,
                error = %e,
                "profile fetch failed, using placeholder name"
            );
            None
        }
    }
}

const fn content_type(content: &EventContent) -> ContentType {
    match content {
        EventContent::Text { .. } => ContentType::Text,
        EventContent::Image { .. } => ContentType::Image,
        EventContent::Sticker { .. } => ContentType::Sticker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn channel_with_secret(secret: Option<&str>) -> ConnectedChannel {
        ConnectedChannel {
            id: "ch-1".to_string(),
            platform: Platform::Line,
            name: None,
            platform_account_id: "U-dest".to_string(),
            access_token: "token".to_string(),
            channel_secret: secret.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_line_signature_accepts_signed_body() {
        let channel = channel_with_secret(Some("secret"));
        let body = br#"{"destination":"U-dest","events":[]}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            signature::sign_line("secret", body).parse().unwrap(),
        );

        assert!(signature_valid(Platform::Line, &channel, &headers, body));
    }

    #[test]
    fn test_line_signature_rejects_altered_body() {
        let channel = channel_with_secret(Some("secret"));
        let body = br#"{"destination":"U-dest","events":[]}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            signature::sign_line("secret", body).parse().unwrap(),
        );

        let altered = br#"{"destination":"U-evil","events":[]}"#;
        assert!(!signature_valid(Platform::Line, &channel, &headers, altered));
    }

    #[test]
    fn test_signature_rejects_other_channels_secret() {
        let channel = channel_with_secret(Some("secret-a"));
        let body = b"payload";

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            signature::sign_line("secret-b", body).parse().unwrap(),
        );

        assert!(!signature_valid(Platform::Line, &channel, &headers, body));
    }

    #[test]
    fn test_missing_header_fails_closed() {
        let channel = channel_with_secret(Some("secret"));
        let headers = HeaderMap::new();
        assert!(!signature_valid(Platform::Line, &channel, &headers, b"x"));

        // An unconfigured secret never verifies a real signature either
        let open = channel_with_secret(None);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            signature::sign_line("secret", b"x").parse().unwrap(),
        );
        assert!(!signature_valid(Platform::Line, &open, &headers, b"x"));
    }

    #[test]
    fn test_facebook_signature_header() {
        let mut channel = channel_with_secret(Some("app-secret"));
        channel.platform = Platform::Facebook;
        let body = br#"{"object":"page","entry":[]}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-hub-signature-256",
            signature::sign_facebook("app-secret", body).parse().unwrap(),
        );

        assert!(signature_valid(Platform::Facebook, &channel, &headers, body));
        assert!(!signature_valid(Platform::Facebook, &channel, &headers, b"tampered"));
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(
            content_type(&EventContent::Text { text: "hi".to_string() }),
            ContentType::Text
        );
        assert_eq!(
            content_type(&EventContent::Image { url: None }),
            ContentType::Image
        );
        assert_eq!(
            content_type(&EventContent::Sticker {
                package_id: "446".to_string(),
                sticker_id: "1988".to_string()
            }),
            ContentType::Sticker
        );
    }
}
