//! Chat completion client for reply generation
//!
//! Calls an OpenAI-compatible `/chat/completions` endpoint. Failures are
//! categorized so the generator can pick a matching fallback reply instead
//! of surfacing raw provider errors to end users.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A chat completion failure, categorized for fallback selection
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// Credentials missing or rejected by the provider (401/403)
    #[error("chat credentials rejected: {0}")]
    Credentials(String),
    /// Provider rate limit or quota exhaustion (429)
    #[error("chat quota exhausted: {0}")]
    Quota(String),
    /// Transport failures, provider 5xx, malformed responses
    #[error("chat request failed: {0}")]
    Transport(String),
}

/// A model that turns a system prompt and user prompt into assistant text
///
/// The model id is passed per call so the fine-tuned variant can be
/// selected per turn from live settings.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one chat completion and return the assistant text
    ///
    /// # Errors
    ///
    /// Returns a categorized [`ChatError`] on any failure.
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ChatError>;
}

/// Client for OpenAI-compatible chat completion APIs
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key is empty.
    pub fn new(api_base: &str, api_key: &str, max_tokens: u32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("chat API key is empty".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ChatError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            max_tokens: u32,
        }

        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }

        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ChatError::Credentials(format!("chat API returned {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatError::Quota(format!("chat API returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Transport(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Transport(format!("invalid chat response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Transport("chat response had no content".to_string()))
    }
}
