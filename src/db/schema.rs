//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Customers: one row per end user, platform-independent
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL DEFAULT 'Unknown',
            phone_number TEXT,
            crm_tags TEXT NOT NULL DEFAULT '[]',
            skin_concerns TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Social identities: a customer's account on one platform
        CREATE TABLE IF NOT EXISTS social_identities (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES customers(id),
            platform TEXT NOT NULL,
            platform_user_id TEXT NOT NULL,
            profile_name TEXT,
            avatar_url TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(platform, platform_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_identities_customer ON social_identities(customer_id);

        -- Connected channels: bot accounts this deployment serves
        CREATE TABLE IF NOT EXISTS connected_channels (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            name TEXT,
            platform_account_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            channel_secret TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(platform, platform_account_id)
        );

        -- Conversations: at most one active thread per identity
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            social_identity_id TEXT NOT NULL REFERENCES social_identities(id),
            channel_id TEXT NOT NULL REFERENCES connected_channels(id),
            status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'archived')),
            ai_mode INTEGER NOT NULL DEFAULT 1,
            last_message_at TEXT NOT NULL DEFAULT (datetime('now')),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_identity
            ON conversations(social_identity_id, status);
        CREATE INDEX IF NOT EXISTS idx_conversations_activity
            ON conversations(last_message_at);

        -- Messages: append-only per conversation
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_type TEXT NOT NULL CHECK(sender_type IN ('user', 'ai', 'agent')),
            content_type TEXT NOT NULL DEFAULT 'text' CHECK(content_type IN ('text', 'image', 'sticker')),
            content TEXT NOT NULL,
            raw_payload TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    // Note: sqlite-vec extension is registered globally in db::init()
    // before any connections are created

    conn.execute_batch(
        r"
        -- Knowledge base entries; embedding blob mirrors the vec0 row
        CREATE TABLE IF NOT EXISTS knowledge_base (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            embedding BLOB,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge_base(category);

        -- Virtual table for vector search over entry embeddings
        CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_vec USING vec0(
            entry_id TEXT PRIMARY KEY,
            embedding FLOAT[1536] distance_metric=cosine
        );

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (knowledge base)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Flat AI settings store; values are JSON scalars
        CREATE TABLE IF NOT EXISTS ai_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Defaults so a fresh deploy answers sensibly before the dashboard writes anything
        INSERT OR IGNORE INTO ai_settings (key, value, description) VALUES
            ('strict_mode', 'false', 'Only answer from retrieved knowledge'),
            ('require_knowledge', 'false', 'Fall back when retrieval finds nothing'),
            ('fallback_message', '"ขออภัยค่ะ เดี๋ยวเจ้าหน้าที่จะมาตอบให้นะคะ 🙏"', 'Reply used when the AI cannot answer'),
            ('min_confidence', '0.3', 'Similarity floor for knowledge retrieval'),
            ('use_finetuned_model', 'false', 'Use the fine-tuned model and skip baseline retrieval'),
            ('recent_knowledge_days', '7', 'Recency window for fine-tuned mode knowledge deltas');

        PRAGMA user_version = 3;
        "#,
    )?;

    tracing::info!("migrated to schema v3 (ai settings)");
    Ok(())
}
