//! Knowledge base admin endpoints
//!
//! Create embeds synchronously so an entry is searchable the moment the
//! dashboard sees it listed.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use super::{error_response, ApiState, ErrorResponse};
use crate::db::KnowledgeEntry;

/// Default page size for listing entries
const DEFAULT_LIST_LIMIT: usize = 100;

/// Request body to add a knowledge entry
#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    pub content: String,
    /// Defaults to `general`, the always-included category
    pub category: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters for listing entries
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Build knowledge router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_entries).post(create_entry))
        .route("/{id}", delete(delete_entry))
        .with_state(state)
}

/// List knowledge entries, newest first
async fn list_entries(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<KnowledgeEntry>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let entries = state.knowledge.list(limit).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    Ok(Json(entries))
}

/// Add a knowledge entry, embedding it synchronously
async fn create_entry(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<KnowledgeEntry>), (StatusCode, Json<ErrorResponse>)> {
    if req.content.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            error_response("invalid_request", "content is required"),
        ));
    }

    let Some(embedder) = &state.embedder else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            error_response(
                "embedder_unavailable",
                "no embedding backend configured, set an LLM API key",
            ),
        ));
    };

    let embedding = embedder.embed(&req.content).await.map_err(|e| {
        (
            StatusCode::BAD_GATEWAY,
            error_response("embedding_failed", &e.to_string()),
        )
    })?;

    let category = req.category.as_deref().unwrap_or("general");
    let metadata = req
        .metadata
        .unwrap_or_else(|| serde_json::json!({ "source": "admin-dashboard" }));

    let entry = state
        .knowledge
        .insert(&req.content, category, Some(&embedding), &metadata)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_response("database_error", &e.to_string()),
            )
        })?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// Delete a knowledge entry
async fn delete_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let removed = state.knowledge.delete(&id).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            error_response("not_found", &format!("knowledge entry {id}")),
        ))
    }
}
