//! Behavior settings endpoints
//!
//! The dashboard reads and writes the flat key/value map; the pipeline
//! consumes the typed view through `SettingsRepo::load` on every turn, so
//! updates here apply to the next inbound message.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};

use super::{error_response, ApiState, ErrorResponse};

/// Build settings router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ai", get(get_settings).put(update_settings))
        .with_state(state)
}

/// Serve all settings as a flat key to value map
async fn get_settings(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    settings_map(&state).map(Json)
}

/// Upsert the submitted keys and serve the refreshed map
async fn update_settings(
    State(state): State<Arc<ApiState>>,
    Json(updates): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    for (key, value) in &updates {
        state.settings.update(key, value).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_response("database_error", &e.to_string()),
            )
        })?;
    }

    settings_map(&state).map(Json)
}

fn settings_map(
    state: &ApiState,
) -> Result<serde_json::Value, (StatusCode, Json<ErrorResponse>)> {
    let rows = state.settings.all().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    let mut map = serde_json::Map::new();
    for row in rows {
        map.insert(row.key, row.value);
    }

    Ok(serde_json::Value::Object(map))
}
