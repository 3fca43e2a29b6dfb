//! Message repository: append-only per-conversation history

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Ai,
    Agent,
}

impl SenderType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::Agent => "agent",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "ai" => Some(Self::Ai),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

/// What kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Sticker,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Sticker => "sticker",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "sticker" => Some(Self::Sticker),
            _ => None,
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_type: SenderType,
    pub content_type: ContentType,
    pub content: String,
    /// Original platform event for non-text reconstruction and audit
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_type, content_type, content, raw_payload, created_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let raw: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_type: SenderType::parse(&row.get::<_, String>(2)?).unwrap_or(SenderType::User),
        content_type: ContentType::parse(&row.get::<_, String>(3)?).unwrap_or(ContentType::Text),
        content: row.get(4)?,
        raw_payload: raw.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a message and bump the conversation's `last_message_at`
    ///
    /// Every append moves the conversation to the top of the console list,
    /// regardless of sender.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn append(
        &self,
        conversation_id: &str,
        sender_type: SenderType,
        content_type: ContentType,
        content: &str,
        raw_payload: Option<&serde_json::Value>,
    ) -> Result<Message> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let raw_str = raw_payload.map(serde_json::Value::to_string);

        conn.execute(
            "INSERT INTO messages
                 (id, conversation_id, sender_type, content_type, content, raw_payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                conversation_id,
                sender_type.as_str(),
                content_type.as_str(),
                content,
                raw_str,
                &now_str
            ],
        )?;

        conn.execute(
            "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
            [&now_str, conversation_id],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender_type,
            content_type,
            content: content.to_string(),
            raw_payload: raw_payload.cloned(),
            created_at: now,
        })
    }

    /// Get the most recent messages, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        ))?;

        #[allow(clippy::cast_possible_wrap)]
        let messages: Vec<Message> = stmt
            .query_map(rusqlite::params![conversation_id, limit as i64], row_to_message)?
            .filter_map(std::result::Result::ok)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Ok(messages)
    }

    /// List the full history of a conversation, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let messages = stmt
            .query_map([conversation_id], row_to_message)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(messages)
    }

    /// Count messages in a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Count messages from a given sender in a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count_by_sender(&self, conversation_id: &str, sender: SenderType) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND sender_type = ?2",
            [conversation_id, sender.as_str()],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
