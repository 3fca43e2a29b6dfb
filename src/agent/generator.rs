//! Reply generation
//!
//! Builds the prompt from persona, live settings, retrieved knowledge, and
//! recent history, then runs one chat completion under a hard timeout. Every
//! failure path produces a polite fallback reply instead of an error; the
//! customer never sees silence or a raw provider message.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{AiSettings, MessageRepo, SenderType};
use crate::Result;

use super::escalation::should_escalate;
use super::llm::{ChatError, ChatModel};
use super::retriever::KnowledgeRetriever;

/// Hard cap on one chat completion
const GENERATION_TIMEOUT: Duration = Duration::from_secs(25);

/// Prior messages included in the prompt
const HISTORY_WINDOW: usize = 5;

/// Base system prompt; rule 4 deliberately uses the staff-contact phrase the
/// escalation scan looks for
const PERSONA: &str = "You are the AI consultant for an aesthetic clinic. \
Answer questions about treatments, prices, and promotions in the customer's language \
(Thai for Thai customers). Be professional, friendly, and concise.\n\
Rules:\n\
1. Never diagnose medical conditions; suggest a doctor consultation instead.\n\
2. Guide interested customers toward booking an appointment.\n\
3. Answer pricing and treatment questions from the knowledge context when provided.\n\
4. If the customer is upset or asks for a person, tell them to contact staff \
(ติดต่อเจ้าหน้าที่).";

/// Reply when model credentials are missing or rejected
const CREDENTIALS_FALLBACK: &str =
    "⚠️ ระบบ AI ยังไม่พร้อมใช้งาน (ไม่มี API Key) กรุณาติดต่อเจ้าหน้าที่ค่ะ";

/// Reply when the provider reports quota exhaustion
const QUOTA_FALLBACK: &str =
    "ขออภัยค่ะ ขณะนี้มีผู้ใช้งานจำนวนมาก เดี๋ยวเจ้าหน้าที่จะมาตอบให้นะคะ 🙏";

/// Reply for timeouts, transport failures, and empty model output
const GENERIC_FALLBACK: &str =
    "ขออภัยค่ะ ระบบขัดข้องชั่วคราว เดี๋ยวเจ้าหน้าที่จะมาตอบให้นะคะ 🙏";

/// One generated turn
#[derive(Debug, Clone)]
pub struct AiReply {
    pub message: String,
    /// Hand the conversation to a human after dispatching this reply
    pub should_escalate: bool,
    /// 1.0 for model output, 0.0 for fallback replies
    pub confidence: f32,
}

/// Turns an inbound user message into an [`AiReply`]
pub struct ResponseGenerator {
    messages: MessageRepo,
    retriever: KnowledgeRetriever,
    chat: Option<Arc<dyn ChatModel>>,
    model: String,
    finetuned_model: Option<String>,
}

impl ResponseGenerator {
    /// Create a new generator; `chat` is `None` when no credentials were
    /// configured at startup
    #[must_use]
    pub fn new(
        messages: MessageRepo,
        retriever: KnowledgeRetriever,
        chat: Option<Arc<dyn ChatModel>>,
        model: String,
        finetuned_model: Option<String>,
    ) -> Self {
        Self { messages, retriever, chat, model, finetuned_model }
    }

    /// Generate a reply for one user message
    ///
    /// Generation and retrieval failures degrade to fallback replies. Only
    /// datastore failures propagate; the caller drops the turn on those.
    ///
    /// # Errors
    ///
    /// Returns error if reading conversation history fails.
    pub async fn generate(
        &self,
        conversation_id: &str,
        user_message: &str,
        settings: &AiSettings,
    ) -> Result<AiReply> {
        let knowledge = self.retriever.retrieve(user_message, settings).await;

        if settings.require_knowledge && !knowledge.found {
            tracing::info!(
                conversation_id = %conversation_id,
                "knowledge required but none found, replying with configured fallback"
            );
            return Ok(fallback(&settings.fallback_message));
        }

        let Some(chat) = &self.chat else {
            tracing::warn!("no chat model configured, replying with credentials fallback");
            return Ok(fallback(CREDENTIALS_FALLBACK));
        };

        let system_prompt = build_system_prompt(settings, &knowledge.context);
        let history = self.history_block(conversation_id, user_message)?;
        let user_prompt = format!("Chat History:\n{history}\n\nUser: {user_message}");

        let model = if settings.use_finetuned_model {
            self.finetuned_model.as_deref().unwrap_or(&self.model)
        } else {
            &self.model
        };

        let outcome = tokio::time::timeout(
            GENERATION_TIMEOUT,
            chat.complete(model, &system_prompt, &user_prompt),
        )
        .await;

        let reply = match outcome {
            Err(_) => {
                tracing::warn!(conversation_id = %conversation_id, "generation timed out");
                fallback(GENERIC_FALLBACK)
            }
            Ok(Err(e)) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "generation failed");
                match e {
                    ChatError::Credentials(_) => fallback(CREDENTIALS_FALLBACK),
                    ChatError::Quota(_) => fallback(QUOTA_FALLBACK),
                    ChatError::Transport(_) => fallback(GENERIC_FALLBACK),
                }
            }
            Ok(Ok(text)) if text.trim().is_empty() => {
                tracing::warn!(conversation_id = %conversation_id, "model returned empty text");
                fallback(GENERIC_FALLBACK)
            }
            Ok(Ok(text)) => AiReply {
                should_escalate: should_escalate(&text, user_message),
                message: text,
                confidence: 1.0,
            },
        };

        Ok(reply)
    }

    /// Format the recent history window, oldest first
    ///
    /// The inbound message is persisted before generation, so it is dropped
    /// from the window; the prompt carries it as the explicit user turn.
    fn history_block(&self, conversation_id: &str, user_message: &str) -> Result<String> {
        let mut history = self.messages.recent(conversation_id, HISTORY_WINDOW + 1)?;

        let trailing_current = history
            .last()
            .is_some_and(|m| m.sender_type == SenderType::User && m.content == user_message);
        if trailing_current {
            history.pop();
        }

        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let lines: Vec<String> = history[start..]
            .iter()
            .map(|m| {
                let role = if m.sender_type == SenderType::User { "User" } else { "Assistant" };
                format!("{role}: {}", m.content)
            })
            .collect();

        Ok(lines.join("\n"))
    }
}

fn fallback(text: &str) -> AiReply {
    AiReply { message: text.to_string(), should_escalate: true, confidence: 0.0 }
}

fn build_system_prompt(settings: &AiSettings, context: &str) -> String {
    let mut prompt = PERSONA.to_string();

    if settings.strict_mode {
        prompt.push_str(&format!(
            "\n\nStrict mode: answer ONLY from the knowledge context provided below. \
             If the context does not cover the question, reply exactly with: {}",
            settings.fallback_message
        ));
    }

    if !context.is_empty() {
        prompt.push_str("\n\nContext from Knowledge Base:\n");
        prompt.push_str(context);
    }

    prompt
}
