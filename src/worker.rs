//! Bounded reply queue and worker
//!
//! The webhook handler enqueues one job per inbound text message and returns
//! immediately; this worker drains the queue and runs the full reply turn.
//! When the queue is full the job is dropped with a warning; the inbound
//! message is already persisted, so nothing is lost except the automatic
//! reply.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::agent::{ModeController, ResponseGenerator};
use crate::db::{ChannelRepo, ContentType, ConversationRepo, MessageRepo, SenderType, SettingsRepo};
use crate::dispatch::deliver_with_fallback;
use crate::events::{ChangeEvent, EventBus};
use crate::platforms::{ClientFactory, Platform};
use crate::Result;

/// Jobs buffered before the queue starts shedding
const QUEUE_CAPACITY: usize = 256;

/// One pending reply turn
#[derive(Debug, Clone)]
pub struct ReplyJob {
    pub conversation_id: String,
    pub channel_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    /// The inbound user text this turn answers
    pub text: String,
}

/// Producer handle for the reply queue
#[derive(Clone)]
pub struct ReplyQueue {
    tx: mpsc::Sender<ReplyJob>,
}

impl ReplyQueue {
    /// Enqueue a reply turn without blocking; drops the job when the queue
    /// is saturated or the worker is gone
    pub fn enqueue(&self, job: ReplyJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                tracing::warn!(
                    conversation_id = %job.conversation_id,
                    "reply queue full, dropping reply job"
                );
            }
            Err(TrySendError::Closed(job)) => {
                tracing::warn!(
                    conversation_id = %job.conversation_id,
                    "reply worker stopped, dropping reply job"
                );
            }
        }
    }
}

/// Drains the reply queue one job at a time
pub struct ReplyWorker {
    rx: mpsc::Receiver<ReplyJob>,
    conversations: ConversationRepo,
    channels: ChannelRepo,
    messages: MessageRepo,
    settings: SettingsRepo,
    generator: ResponseGenerator,
    modes: ModeController,
    bus: EventBus,
    clients: Arc<dyn ClientFactory>,
}

impl ReplyWorker {
    /// Create the queue/worker pair
    #[must_use]
    pub fn new(
        conversations: ConversationRepo,
        channels: ChannelRepo,
        messages: MessageRepo,
        settings: SettingsRepo,
        generator: ResponseGenerator,
        bus: EventBus,
        clients: Arc<dyn ClientFactory>,
    ) -> (ReplyQueue, Self) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let modes = ModeController::new(conversations.clone(), bus.clone());
        let worker = Self {
            rx,
            conversations,
            channels,
            messages,
            settings,
            generator,
            modes,
            bus,
            clients,
        };
        (ReplyQueue { tx }, worker)
    }

    /// Run until every queue handle is dropped
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
        }
        tracing::info!("reply worker stopped");
    }

    /// Drain one job if present, returning whether one was processed
    ///
    /// Lets tests drive the worker deterministically without spawning it.
    pub async fn process_next(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(job) => {
                self.process(job).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn process(&self, job: ReplyJob) {
        let conversation_id = job.conversation_id.clone();
        if let Err(e) = self.reply(&job).await {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "reply turn failed"
            );
        }
    }

    async fn reply(&self, job: &ReplyJob) -> Result<()> {
        // A human may have taken over while the job sat in the queue
        let conversation = self.conversations.get(&job.conversation_id)?;
        if !conversation.ai_mode {
            tracing::debug!(
                conversation_id = %job.conversation_id,
                "ai mode off, skipping automatic reply"
            );
            return Ok(());
        }

        // Settings are read fresh so console changes apply to queued jobs
        let settings = self.settings.load()?;
        let reply = self.generator.generate(&job.conversation_id, &job.text, &settings).await?;

        let message = self.messages.append(
            &job.conversation_id,
            SenderType::Ai,
            ContentType::Text,
            &reply.message,
            None,
        )?;
        self.bus.publish(ChangeEvent::MessageAdded { message });

        // Mode flips before dispatch so the console never sees an AI-owned
        // conversation after an escalating reply went out
        if reply.should_escalate {
            self.modes.escalate(&job.conversation_id)?;
        }

        let channel = self.channels.get(&job.channel_id)?;
        let client = self.clients.client_for(job.platform, &channel.access_token);
        deliver_with_fallback(client.as_ref(), &job.platform_user_id, &reply.message).await?;

        tracing::info!(
            conversation_id = %job.conversation_id,
            confidence = reply.confidence,
            escalated = reply.should_escalate,
            "reply dispatched"
        );
        Ok(())
    }
}
