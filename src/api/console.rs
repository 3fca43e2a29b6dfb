//! Live console: REST snapshots and the realtime WebSocket
//!
//! Connected consoles load snapshots over REST, then keep state current from
//! the broadcast bus: message inserts scoped to the subscribed conversation,
//! conversation updates unscoped. Mutating commands answer through the bus
//! rather than directly, so every console sees one authoritative event per
//! change; command failures come back as `error` frames on the issuing
//! socket only.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{self, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use super::{error_response, ApiState, ErrorResponse};
use crate::db::{Conversation, ConversationOverview, ContentType, Message, SenderType};
use crate::events::ChangeEvent;
use crate::{Error, Result};

/// Incoming console command
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Receive message events for one conversation
    Subscribe { conversation_id: String },
    /// Hand a conversation to the AI or take it over
    ToggleAiMode {
        conversation_id: String,
        enabled: bool,
    },
    /// Send a human-agent reply into a taken-over conversation
    AgentSend {
        conversation_id: String,
        content: String,
    },
    /// Keep-alive
    Ping,
}

/// Outgoing console event
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Connection established
    Connected,
    Subscribed {
        conversation_id: String,
    },
    /// A message landed in the subscribed conversation
    MessageAdded {
        message: Message,
    },
    /// A conversation changed; sent to every console
    ConversationUpdated {
        conversation: Conversation,
    },
    /// The subscription fell behind; reload snapshots and resubscribe
    Resync,
    Error {
        code: String,
        message: String,
    },
    Pong,
}

/// Build console snapshot router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}/messages", get(list_messages))
        .with_state(state)
}

/// Build console WebSocket router
pub fn ws_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/console", get(ws_upgrade))
        .with_state(state)
}

/// List all conversations joined with identity and customer, newest
/// activity first
async fn list_conversations(
    State(state): State<Arc<ApiState>>,
) -> std::result::Result<Json<Vec<ConversationOverview>>, (StatusCode, Json<ErrorResponse>)> {
    let overviews = state.conversations.list_overview().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    Ok(Json(overviews))
}

/// Full message history of one conversation, oldest first
async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Vec<Message>>, (StatusCode, Json<ErrorResponse>)> {
    state.conversations.get(&id).map_err(|e| match e {
        Error::NotFound(msg) => (StatusCode::NOT_FOUND, error_response("not_found", &msg)),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &other.to_string()),
        ),
    })?;

    let messages = state.messages.list(&id).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("database_error", &e.to_string()),
        )
    })?;

    Ok(Json(messages))
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one console connection
///
/// A single loop multiplexes client commands and bus events. A lagged bus
/// receiver cannot be repaired incrementally, so the client is told to
/// resync instead.
async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>) {
    let mut updates = state.bus.subscribe();
    let mut subscription: Option<String> = None;

    if !send(&mut socket, &WsOutgoing::Connected).await {
        return;
    }
    tracing::info!("console connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(frame)) = incoming else { break };
                let ws::Message::Text(text) = frame else { continue };

                let command = match serde_json::from_str::<WsIncoming>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        let error = WsOutgoing::Error {
                            code: "invalid_command".to_string(),
                            message: e.to_string(),
                        };
                        if !send(&mut socket, &error).await {
                            break;
                        }
                        continue;
                    }
                };

                if let Some(reply) = handle_command(&state, &mut subscription, command).await {
                    if !send(&mut socket, &reply).await {
                        break;
                    }
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(event) => {
                        if let Some(outgoing) = filter_event(subscription.as_deref(), event) {
                            if !send(&mut socket, &outgoing).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "console subscription lagged");
                        if !send(&mut socket, &WsOutgoing::Resync).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("console disconnected");
}

/// Execute a console command
///
/// `None` means the outcome reaches the client through the bus; only
/// request/response commands and failures answer directly.
async fn handle_command(
    state: &ApiState,
    subscription: &mut Option<String>,
    command: WsIncoming,
) -> Option<WsOutgoing> {
    match command {
        WsIncoming::Subscribe { conversation_id } => {
            match state.conversations.get(&conversation_id) {
                Ok(_) => {
                    *subscription = Some(conversation_id.clone());
                    Some(WsOutgoing::Subscribed { conversation_id })
                }
                Err(e) => Some(command_error(&e)),
            }
        }
        WsIncoming::ToggleAiMode {
            conversation_id,
            enabled,
        } => match state.modes.set_mode(&conversation_id, enabled) {
            Ok(_) => None,
            Err(e) => Some(command_error(&e)),
        },
        WsIncoming::AgentSend {
            conversation_id,
            content,
        } => agent_send(state, &conversation_id, &content).await,
        WsIncoming::Ping => Some(WsOutgoing::Pong),
    }
}

/// Persist and dispatch a human-agent message
///
/// Rejected while the AI owns the conversation. The platform push is
/// best-effort; the persisted message is the source of truth either way.
async fn agent_send(state: &ApiState, conversation_id: &str, content: &str) -> Option<WsOutgoing> {
    if content.trim().is_empty() {
        return Some(WsOutgoing::Error {
            code: "invalid_command".to_string(),
            message: "content is required".to_string(),
        });
    }

    let conversation = match state.conversations.get(conversation_id) {
        Ok(conversation) => conversation,
        Err(e) => return Some(command_error(&e)),
    };

    if conversation.ai_mode {
        return Some(WsOutgoing::Error {
            code: "ai_mode_active".to_string(),
            message: "take over the conversation before sending".to_string(),
        });
    }

    let message = match state.messages.append(
        conversation_id,
        SenderType::Agent,
        ContentType::Text,
        content,
        None,
    ) {
        Ok(message) => message,
        Err(e) => return Some(command_error(&e)),
    };
    state.bus.publish(ChangeEvent::MessageAdded { message });

    if let Err(e) = push_to_platform(state, &conversation, content).await {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %e,
            "agent message persisted but not delivered to platform"
        );
    }

    None
}

/// Push an agent message out through the conversation's channel
async fn push_to_platform(
    state: &ApiState,
    conversation: &Conversation,
    text: &str,
) -> Result<()> {
    let identity = state.identities.get(&conversation.social_identity_id)?;
    let channel = state.channels.get(&conversation.channel_id)?;
    let client = state
        .clients
        .client_for(identity.platform, &channel.access_token);
    client.send_text(&identity.platform_user_id, text).await
}

/// Map a bus event to the console wire, honoring the subscription scope
fn filter_event(subscription: Option<&str>, event: ChangeEvent) -> Option<WsOutgoing> {
    match event {
        ChangeEvent::MessageAdded { message } => {
            if subscription == Some(message.conversation_id.as_str()) {
                Some(WsOutgoing::MessageAdded { message })
            } else {
                None
            }
        }
        ChangeEvent::ConversationUpdated { conversation } => {
            Some(WsOutgoing::ConversationUpdated { conversation })
        }
    }
}

fn command_error(e: &Error) -> WsOutgoing {
    let code = match e {
        Error::NotFound(_) => "not_found",
        _ => "database_error",
    };
    WsOutgoing::Error {
        code: code.to_string(),
        message: e.to_string(),
    }
}

/// Send one event; false means the socket is gone
async fn send(socket: &mut WebSocket, outgoing: &WsOutgoing) -> bool {
    let Ok(text) = serde_json::to_string(outgoing) else {
        return true;
    };
    socket.send(ws::Message::Text(text.into())).await.is_ok()
}
