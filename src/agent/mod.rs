//! AI reply pipeline: retrieval, generation, and escalation
//!
//! The retriever assembles knowledge context, the generator runs one chat
//! completion (or picks a fallback), and the escalation rules decide when a
//! conversation leaves AI hands.

pub mod escalation;
pub mod generator;
pub mod llm;
pub mod retriever;

pub use escalation::{should_escalate, ModeController};
pub use generator::{AiReply, ResponseGenerator};
pub use llm::{ChatError, ChatModel, OpenAiChat};
pub use retriever::{KnowledgeRetriever, RetrievedKnowledge};
