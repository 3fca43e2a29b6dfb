//! Connected channel admin endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use super::{error_response, ApiState, ErrorResponse};
use crate::db::ConnectedChannel;
use crate::platforms::Platform;
use crate::Error;

/// Request body to connect a channel
///
/// `channel_secret` is optional; a channel without one can never pass
/// signature verification, which is the intended state for accounts that
/// are connected for outbound sending only.
#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub platform: String,
    pub name: Option<String>,
    pub platform_account_id: String,
    pub access_token: String,
    pub channel_secret: Option<String>,
}

/// Build channels router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_channels).post(create_channel))
        .route("/{id}", delete(delete_channel))
        .with_state(state)
}

/// List connected channels, credentials omitted
async fn list_channels(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ConnectedChannel>>, (StatusCode, Json<ErrorResponse>)> {
    let channels = state.channels.list().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    Ok(Json(channels))
}

/// Connect a bot account
async fn create_channel(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ConnectedChannel>), (StatusCode, Json<ErrorResponse>)> {
    let Some(platform) = Platform::parse(&req.platform) else {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response(
                "unsupported_platform",
                &format!("unknown platform {}", req.platform),
            ),
        ));
    };

    if req.platform_account_id.trim().is_empty() || req.access_token.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response(
                "invalid_request",
                "platform_account_id and access_token are required",
            ),
        ));
    }

    let channel = state
        .channels
        .create(
            platform,
            req.name.as_deref(),
            &req.platform_account_id,
            &req.access_token,
            req.channel_secret.as_deref(),
        )
        .map_err(|e| match e {
            Error::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, error_response("invalid_request", &msg))
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_response("database_error", &other.to_string()),
            ),
        })?;

    tracing::info!(
        channel_id = %channel.id,
        platform = %channel.platform,
        account = %channel.platform_account_id,
        "channel connected"
    );

    Ok((StatusCode::CREATED, Json(channel)))
}

/// Disconnect a channel
async fn delete_channel(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.channels.delete(&id).map_err(|e| match e {
        Error::NotFound(msg) => (StatusCode::NOT_FOUND, error_response("not_found", &msg)),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &other.to_string()),
        ),
    })?;

    tracing::info!(channel_id = %id, "channel disconnected");

    Ok(StatusCode::NO_CONTENT)
}
