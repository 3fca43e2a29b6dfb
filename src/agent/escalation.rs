//! Escalation triggers and AI mode control
//!
//! A conversation hands off to a human when the generated reply defers to
//! staff, when the user sounds upset, or when required knowledge is missing.
//! The reverse direction is never automatic; only an explicit console toggle
//! returns a conversation to the AI.

use crate::db::{Conversation, ConversationRepo};
use crate::events::{ChangeEvent, EventBus};
use crate::Result;

/// Phrases in generated text meaning the assistant deferred to staff
const REPLY_TRIGGERS: &[&str] = &["contact staff", "talk to human", "ติดต่อเจ้าหน้าที่"];

/// Phrases in the user's message expressing complaint or anger
const USER_TRIGGERS: &[&str] = &["complain", "angry", "ร้องเรียน"];

/// Whether this turn should hand the conversation to a human
///
/// Scans both the generated reply and the user's message, case-insensitively.
/// A complaining user escalates regardless of what the model said.
#[must_use]
pub fn should_escalate(generated: &str, user_message: &str) -> bool {
    let generated = generated.to_lowercase();
    let user_message = user_message.to_lowercase();

    REPLY_TRIGGERS.iter().any(|t| generated.contains(t))
        || USER_TRIGGERS.iter().any(|t| user_message.contains(t))
}

/// Flips conversation AI mode and broadcasts the change
#[derive(Clone)]
pub struct ModeController {
    conversations: ConversationRepo,
    bus: EventBus,
}

impl ModeController {
    /// Create a new mode controller
    #[must_use]
    pub fn new(conversations: ConversationRepo, bus: EventBus) -> Self {
        Self { conversations, bus }
    }

    /// Hand the conversation to a human (disable automatic replies)
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the update fails
    pub fn escalate(&self, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.conversations.set_ai_mode(conversation_id, false)?;
        tracing::info!(conversation_id = %conversation_id, "conversation escalated to human");
        self.bus
            .publish(ChangeEvent::ConversationUpdated { conversation: conversation.clone() });
        Ok(conversation)
    }

    /// Explicit toggle from the console, either direction
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the update fails
    pub fn set_mode(&self, conversation_id: &str, enabled: bool) -> Result<Conversation> {
        let conversation = self.conversations.set_ai_mode(conversation_id, enabled)?;
        tracing::info!(
            conversation_id = %conversation_id,
            ai_mode = enabled,
            "conversation mode toggled"
        );
        self.bus
            .publish(ChangeEvent::ConversationUpdated { conversation: conversation.clone() });
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, ChannelRepo, IdentityRepo};
    use crate::platforms::Platform;

    #[test]
    fn test_reply_triggers() {
        assert!(should_escalate("Please contact staff for details", "hello"));
        assert!(should_escalate("รบกวนติดต่อเจ้าหน้าที่นะคะ", "สอบถามค่ะ"));
        assert!(!should_escalate("เลเซอร์เริ่มต้น 990 บาทค่ะ", "ราคาเท่าไหร่"));
    }

    #[test]
    fn test_user_triggers_override_benign_reply() {
        assert!(should_escalate("ยินดีให้บริการค่ะ", "I am ANGRY about my appointment"));
        assert!(should_escalate("ยินดีให้บริการค่ะ", "ต้องการร้องเรียนบริการ"));
    }

    #[test]
    fn test_trigger_scan_is_case_insensitive() {
        assert!(should_escalate("please CONTACT STAFF", "hi"));
        assert!(should_escalate("ok", "I want to COMPLAIN"));
    }

    #[tokio::test]
    async fn test_escalate_flips_mode_and_broadcasts() {
        let pool = db::init_memory().unwrap();
        let identity = IdentityRepo::new(pool.clone())
            .create_with_customer(Platform::Line, "U1", "LINE User", None)
            .unwrap();
        let channel = ChannelRepo::new(pool.clone())
            .create(Platform::Line, None, "dest-1", "token", Some("secret"))
            .unwrap();
        let conversations = ConversationRepo::new(pool);
        let conversation = conversations.resolve(&identity.id, &channel.id).unwrap();
        assert!(conversation.ai_mode);

        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let controller = ModeController::new(conversations.clone(), bus);

        let updated = controller.escalate(&conversation.id).unwrap();
        assert!(!updated.ai_mode);
        assert!(!conversations.get(&conversation.id).unwrap().ai_mode);

        match rx.recv().await.unwrap() {
            ChangeEvent::ConversationUpdated { conversation: c } => {
                assert_eq!(c.id, conversation.id);
                assert!(!c.ai_mode);
            }
            ChangeEvent::MessageAdded { .. } => panic!("expected conversation update"),
        }
    }

    #[tokio::test]
    async fn test_set_mode_restores_ai() {
        let pool = db::init_memory().unwrap();
        let identity = IdentityRepo::new(pool.clone())
            .create_with_customer(Platform::Facebook, "psid-1", "Facebook User", None)
            .unwrap();
        let channel = ChannelRepo::new(pool.clone())
            .create(Platform::Facebook, None, "page-1", "token", Some("secret"))
            .unwrap();
        let conversations = ConversationRepo::new(pool);
        let conversation = conversations.resolve(&identity.id, &channel.id).unwrap();

        let controller = ModeController::new(conversations.clone(), EventBus::new());
        controller.escalate(&conversation.id).unwrap();
        let restored = controller.set_mode(&conversation.id, true).unwrap();
        assert!(restored.ai_mode);
    }
}
