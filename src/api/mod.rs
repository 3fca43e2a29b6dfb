//! HTTP API server: webhook ingestion, admin endpoints, live console

pub mod channels;
pub mod console;
pub mod health;
pub mod knowledge;
pub mod settings;
pub mod webhooks;

use std::sync::Arc;

use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::ModeController;
use crate::db::{
    ChannelRepo, ConversationRepo, DbPool, EmbeddingModel, IdentityRepo, KnowledgeRepo,
    MessageRepo, SettingsRepo,
};
use crate::events::EventBus;
use crate::platforms::ClientFactory;
use crate::worker::ReplyQueue;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub channels: ChannelRepo,
    pub identities: IdentityRepo,
    pub conversations: ConversationRepo,
    pub messages: MessageRepo,
    pub knowledge: KnowledgeRepo,
    pub settings: SettingsRepo,
    pub bus: EventBus,
    pub queue: ReplyQueue,
    pub modes: ModeController,
    pub clients: Arc<dyn ClientFactory>,
    /// Text embedder for knowledge search.
    /// Present only when an LLM API key is configured.
    pub embedder: Option<Arc<dyn EmbeddingModel>>,
    /// Whether a chat backend is wired in, reported by the readiness probe
    pub chat_configured: bool,
    /// Expected token for the Facebook webhook verification handshake
    pub facebook_verify_token: Option<String>,
}

/// Standard error envelope for API responses
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

fn error_response(code: &str, message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// Build the router with all routes
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .nest("/webhooks", webhooks::router(state.clone()))
        .nest("/api/channels", channels::router(state.clone()))
        .nest("/api/knowledge", knowledge::router(state.clone()))
        .nest("/api/settings", settings::router(state.clone()))
        .nest("/api/console", console::router(state.clone()))
        .nest("/ws", console::ws_router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state));

    // CORS layer for cross-origin requests from the dashboard
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
