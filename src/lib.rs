//! Aura Relay - omnichannel AI reply gateway for clinic messaging
//!
//! Ingests LINE and Facebook Messenger webhooks, resolves each event to a
//! customer and conversation, generates an AI reply over a local knowledge
//! base, and dispatches it back to the platform. Human agents watch and take
//! over through a live WebSocket console.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Messaging Platforms                  │
//! │        LINE          │      Facebook Messenger       │
//! └──────────┬───────────────────────────▲───────────────┘
//!            │ webhooks                  │ push replies
//! ┌──────────▼───────────────────────────┴───────────────┐
//! │                      Aura Relay                      │
//! │  verify → normalize → resolve → persist → enqueue    │
//! │  worker: retrieve → generate → escalate → dispatch   │
//! └──────────┬───────────────────────────────────────────┘
//!            │ broadcast bus
//! ┌──────────▼───────────────────────────────────────────┐
//! │                  Live Agent Console                  │
//! │      REST snapshots      │      WebSocket events     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod platforms;
pub mod worker;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use events::{ChangeEvent, EventBus};
pub use worker::{ReplyJob, ReplyQueue, ReplyWorker};
