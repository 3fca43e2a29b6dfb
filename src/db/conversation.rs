//! Conversation repository: one active thread per identity

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::identity::{Customer, SocialIdentity};
use super::DbPool;
use crate::platforms::Platform;
use crate::{Error, Result};

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A conversation thread bound to the channel that received it
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub social_identity_id: String,
    pub channel_id: String,
    pub status: ConversationStatus,
    /// Gate for automatic replies; false means a human agent owns the thread
    pub ai_mode: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Console listing row: conversation joined with its identity and customer
#[derive(Debug, Clone, Serialize)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub identity: SocialIdentity,
    pub customer: Customer,
}

const CONVERSATION_COLUMNS: &str =
    "id, social_identity_id, channel_id, status, ai_mode, last_message_at, created_at";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        social_identity_id: row.get(1)?,
        channel_id: row.get(2)?,
        status: ConversationStatus::parse(&row.get::<_, String>(3)?)
            .unwrap_or(ConversationStatus::Active),
        ai_mode: row.get(4)?,
        last_message_at: parse_datetime(&row.get::<_, String>(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    /// Create a new conversation repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find the active conversation for an identity
    ///
    /// The invariant allows at most one; if more than one exists the newest
    /// wins and the anomaly is logged without attempting repair.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_active(&self, social_identity_id: &str) -> Result<Option<Conversation>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE social_identity_id = ?1 AND status = 'active'
             ORDER BY created_at DESC"
        ))?;

        let active: Vec<Conversation> = stmt
            .query_map([social_identity_id], row_to_conversation)?
            .filter_map(std::result::Result::ok)
            .collect();

        if active.len() > 1 {
            tracing::warn!(
                social_identity_id = %social_identity_id,
                count = active.len(),
                "multiple active conversations for one identity, using newest"
            );
        }

        Ok(active.into_iter().next())
    }

    /// Create a new active conversation with AI mode enabled
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, social_identity_id: &str, channel_id: &str) -> Result<Conversation> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute(
            "INSERT INTO conversations
                 (id, social_identity_id, channel_id, status, ai_mode, last_message_at, created_at)
             VALUES (?1, ?2, ?3, 'active', 1, ?4, ?4)",
            [&id, social_identity_id, channel_id, &now_str],
        )?;

        Ok(Conversation {
            id,
            social_identity_id: social_identity_id.to_string(),
            channel_id: channel_id.to_string(),
            status: ConversationStatus::Active,
            ai_mode: true,
            last_message_at: now,
            created_at: now,
        })
    }

    /// Find the active conversation or open a new one on this channel
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn resolve(&self, social_identity_id: &str, channel_id: &str) -> Result<Conversation> {
        if let Some(existing) = self.find_active(social_identity_id)? {
            return Ok(existing);
        }
        self.create(social_identity_id, channel_id)
    }

    /// Get a conversation by id
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the query fails
    pub fn get(&self, id: &str) -> Result<Conversation> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            row_to_conversation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("conversation {id}")),
            other => other.into(),
        })
    }

    /// Set the AI mode flag and return the refreshed row
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the update fails
    pub fn set_ai_mode(&self, id: &str, enabled: bool) -> Result<Conversation> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE conversations SET ai_mode = ?1 WHERE id = ?2",
            rusqlite::params![enabled, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("conversation {id}")));
        }

        drop(conn);
        self.get(id)
    }

    /// List all conversations joined with identity and customer, newest
    /// activity first (the console's initial snapshot)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_overview(&self) -> Result<Vec<ConversationOverview>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.social_identity_id, c.channel_id, c.status, c.ai_mode,
                    c.last_message_at, c.created_at,
                    i.id, i.customer_id, i.platform, i.platform_user_id,
                    i.profile_name, i.avatar_url, i.created_at,
                    cu.id, cu.full_name, cu.phone_number, cu.crm_tags,
                    cu.skin_concerns, cu.created_at
             FROM conversations c
             JOIN social_identities i ON i.id = c.social_identity_id
             JOIN customers cu ON cu.id = i.customer_id
             ORDER BY c.last_message_at DESC",
        )?;

        let overviews = stmt
            .query_map([], |row| {
                let tags_json: String = row.get(17)?;
                let concerns_json: String = row.get(18)?;
                Ok(ConversationOverview {
                    conversation: Conversation {
                        id: row.get(0)?,
                        social_identity_id: row.get(1)?,
                        channel_id: row.get(2)?,
                        status: ConversationStatus::parse(&row.get::<_, String>(3)?)
                            .unwrap_or(ConversationStatus::Active),
                        ai_mode: row.get(4)?,
                        last_message_at: parse_datetime(&row.get::<_, String>(5)?),
                        created_at: parse_datetime(&row.get::<_, String>(6)?),
                    },
                    identity: SocialIdentity {
                        id: row.get(7)?,
                        customer_id: row.get(8)?,
                        platform: Platform::parse(&row.get::<_, String>(9)?)
                            .unwrap_or(Platform::Line),
                        platform_user_id: row.get(10)?,
                        profile_name: row.get(11)?,
                        avatar_url: row.get(12)?,
                        created_at: parse_datetime(&row.get::<_, String>(13)?),
                    },
                    customer: Customer {
                        id: row.get(14)?,
                        full_name: row.get(15)?,
                        phone_number: row.get(16)?,
                        crm_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                        skin_concerns: serde_json::from_str(&concerns_json).unwrap_or_default(),
                        created_at: parse_datetime(&row.get::<_, String>(19)?),
                    },
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(overviews)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
