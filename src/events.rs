//! Change feed for live console sessions
//!
//! The webhook processor, reply worker, and console handlers publish here;
//! every connected console session subscribes. Repositories stay oblivious
//! to the console.

use tokio::sync::broadcast;

use crate::db::{Conversation, Message};

/// Channel capacity for change events
const CHANNEL_CAPACITY: usize = 256;

/// A change that console sessions may want to surface live
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A message was persisted to a conversation
    MessageAdded { message: Message },
    /// Conversation state changed (AI mode, activity ordering)
    ConversationUpdated { conversation: Conversation },
}

/// Broadcast bus for [`ChangeEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future change events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish a change (ignore errors if no subscribers)
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }
}
